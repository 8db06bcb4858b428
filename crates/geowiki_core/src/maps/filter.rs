use std::str::FromStr;

use anyhow::Result;
use geo::{Intersects, Rect, coord};
use tracing::debug;

use crate::config::MapConfig;
use crate::error::GeowikiError;
use crate::model::MapData;

/// Axis-aligned query box in lon/lat degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Parse the `minx,miny,maxx,maxy` query form.
    pub fn parse(value: &str) -> Result<Self> {
        let parts = value
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| GeowikiError::Validation(format!("bbox has a non-numeric component: {value:?}")))?;
        let [min_x, min_y, max_x, max_y] = parts[..] else {
            return Err(GeowikiError::Validation(format!(
                "bbox needs exactly four components (minx,miny,maxx,maxy), got {value:?}"
            ))
            .into());
        };
        if ![min_x, min_y, max_x, max_y].iter().all(|value| value.is_finite()) {
            return Err(GeowikiError::Validation(format!("bbox is not finite: {value:?}")).into());
        }
        if min_x > max_x || min_y > max_y {
            return Err(GeowikiError::Validation(format!("bbox minimum exceeds maximum: {value:?}")).into());
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    pub fn rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_x, y: self.min_y },
            coord! { x: self.max_x, y: self.max_y },
        )
    }
}

impl FromStr for BoundingBox {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

/// Keep records whose points or polygons touch `bbox`, or whose lines lie entirely inside it.
pub fn filter_by_bounds(records: Vec<MapData>, bbox: &BoundingBox) -> Vec<MapData> {
    let rect = bbox.rect();
    let before = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|record| in_bounds(record, bbox, &rect))
        .collect();
    debug!(before, after = kept.len(), "bounds filter");
    kept
}

fn in_bounds(record: &MapData, bbox: &BoundingBox, rect: &Rect<f64>) -> bool {
    let geometry = &record.geometry;
    if geometry
        .points
        .as_ref()
        .is_some_and(|points| points.intersects(rect))
    {
        return true;
    }
    if let Some(lines) = &geometry.lines
        && lines.0.iter().flat_map(|line| line.0.iter()).all(|coord| {
            coord.x >= bbox.min_x && coord.x <= bbox.max_x && coord.y >= bbox.min_y && coord.y <= bbox.max_y
        })
    {
        return true;
    }
    geometry
        .polys
        .as_ref()
        .is_some_and(|polys| polys.intersects(rect))
}

/// Drop records too small to matter at `zoom`.
///
/// While zoomed out past `point_suppression_max_zoom` and at least
/// `point_suppression_min_polygons` input records carry polygons, records without lines or
/// polygons are dropped first. Then records without points shorter than
/// `min_length_base_meters * 2^-zoom` are dropped.
pub fn filter_by_zoom(records: Vec<MapData>, zoom: u8, config: &MapConfig) -> Vec<MapData> {
    let before = records.len();
    let polygon_records = records.iter().filter(|record| record.has_polys()).count();
    let suppress_points = zoom < config.point_suppression_max_zoom
        && polygon_records >= config.point_suppression_min_polygons;
    let min_length = min_length_for_zoom(zoom, config);

    let kept: Vec<_> = records
        .into_iter()
        .filter(|record| !(suppress_points && !record.has_lines() && !record.has_polys()))
        .filter(|record| record.has_points() || record.length >= min_length)
        .collect();
    debug!(
        before,
        after = kept.len(),
        zoom,
        suppress_points,
        min_length,
        "zoom filter"
    );
    kept
}

pub fn min_length_for_zoom(zoom: u8, config: &MapConfig) -> f64 {
    config.min_length_base_meters * 2f64.powi(-i32::from(zoom))
}

/// Longest first, so large shapes render underneath small ones. Ties keep input order.
pub fn sort_for_stacking(records: &mut [MapData]) {
    records.sort_by(|a, b| b.length.total_cmp(&a.length));
}
