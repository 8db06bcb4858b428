//! Map-object pipeline: viewport filters, tag layers, nearby search and the region views
//! built on them.

pub mod filter;
pub mod layers;
pub mod nearby;
pub mod views;
