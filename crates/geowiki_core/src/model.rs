use geo::Point;
use serde::Serialize;

use crate::geometry::MapGeometry;

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: i64,
    pub slug: String,
    pub full_name: String,
    pub geom_wkt: Option<String>,
    pub center: Option<Point<f64>>,
    pub default_zoom: u8,
    pub is_meta_region: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRegion {
    pub slug: String,
    pub full_name: String,
    pub geom_wkt: Option<String>,
    pub center: Option<Point<f64>>,
    pub default_zoom: u8,
    pub is_meta_region: bool,
}

impl NewRegion {
    pub fn named(slug: &str, full_name: &str) -> Self {
        Self {
            slug: slug.to_string(),
            full_name: full_name.to_string(),
            geom_wkt: None,
            center: None,
            default_zoom: crate::config::DEFAULT_REGION_MAP_ZOOM,
            is_meta_region: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub id: i64,
    pub region_id: i64,
    pub name: String,
    pub slug: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageScore {
    pub page_id: i64,
    pub score: i64,
    pub content_length: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: i64,
    pub region_id: i64,
    pub slug: String,
    pub name: String,
}

/// Geometry record joined with the page that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct MapData {
    pub id: i64,
    pub page_id: i64,
    pub region_id: i64,
    pub page_name: String,
    pub page_slug: String,
    pub geometry: MapGeometry,
    pub length: f64,
}

impl MapData {
    pub fn has_points(&self) -> bool {
        self.geometry.has_points()
    }

    pub fn has_lines(&self) -> bool {
        self.geometry.has_lines()
    }

    pub fn has_polys(&self) -> bool {
        self.geometry.has_polys()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontPage {
    pub region_id: i64,
    pub cover_photo: Option<String>,
}
