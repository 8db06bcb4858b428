pub mod config;
pub mod error;
pub mod export;
pub mod files;
pub mod frontpage;
pub mod geometry;
pub mod maps;
pub mod markup;
pub mod migrate;
pub mod model;
pub mod runtime;
pub mod schema;
pub mod slug;
pub mod store;
pub mod tags;
pub mod template;
