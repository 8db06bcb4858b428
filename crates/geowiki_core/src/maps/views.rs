//! Region-level map queries: the store feeds the in-memory filters and the layer aggregator.

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;

use crate::config::MapConfig;
use crate::error::{EntityKind, GeowikiError};
use crate::maps::filter::{BoundingBox, filter_by_bounds, filter_by_zoom, sort_for_stacking};
use crate::maps::layers::{MapLayer, build_layers};
use crate::model::{MapData, Region};
use crate::slug::slug_to_url;
use crate::store::{MapQuery, Store};

/// A record ready for a map widget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapObject {
    pub page_name: String,
    pub page_url: String,
    /// WKT `GEOMETRYCOLLECTION` of every part.
    pub geometry: String,
    pub length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointObject {
    pub page_name: String,
    pub page_url: String,
    pub x: f64,
    pub y: f64,
}

pub fn page_url(region_slug: &str, page_slug: &str) -> String {
    format!("/{region_slug}/{}", slug_to_url(page_slug))
}

pub fn map_object(region_slug: &str, record: &MapData) -> MapObject {
    MapObject {
        page_name: record.page_name.clone(),
        page_url: page_url(region_slug, &record.page_slug),
        geometry: record.geometry.collection_wkt(),
        length: record.length,
    }
}

fn general_query(region: &Region, config: &MapConfig) -> MapQuery {
    MapQuery {
        exclude_tag_slugs: config.excluded_tag_slugs.clone(),
        ..MapQuery::region(region.id)
    }
}

/// Every non-administrative record of the region at the region-map zoom, longest first.
pub fn region_map(store: &Store, region: &Region, config: &MapConfig) -> Result<Vec<MapData>> {
    let records = store.map_data(&general_query(region, config))?;
    let mut records = filter_by_zoom(records, config.region_map_zoom, config);
    sort_for_stacking(&mut records);
    Ok(records)
}

/// [`region_map`] split into the base layer plus one layer per configured tag name.
pub fn region_layer_map(store: &Store, region: &Region, config: &MapConfig) -> Result<Vec<MapLayer<MapData>>> {
    let records = region_map(store, region, config)?;
    let tag_names = store.tag_names_by_page(Some(region.id))?;
    Ok(layers_by_tag_name(&records, &config.layer_names, &tag_names, |record| record.page_id))
}

pub(crate) fn layers_by_tag_name<T: Clone>(
    records: &[T],
    layer_names: &[String],
    tag_names: &HashMap<i64, std::collections::BTreeSet<String>>,
    page_id: impl Fn(&T) -> i64,
) -> Vec<MapLayer<T>> {
    build_layers(records, layer_names, |record, name| {
        tag_names
            .get(&page_id(record))
            .is_some_and(|names| names.contains(name))
    })
}

/// Records for a viewport; each filter applies only when its parameter is given.
pub fn objects_for_bounds(
    store: &Store,
    region: &Region,
    bbox: Option<&BoundingBox>,
    zoom: Option<u8>,
    config: &MapConfig,
) -> Result<Vec<MapObject>> {
    let mut records = store.map_data(&general_query(region, config))?;
    if let Some(bbox) = bbox {
        records = filter_by_bounds(records, bbox);
    }
    if let Some(zoom) = zoom {
        records = filter_by_zoom(records, zoom, config);
    }
    sort_for_stacking(&mut records);
    Ok(records
        .iter()
        .map(|record| map_object(&region.slug, record))
        .collect())
}

pub fn map_for_tag(store: &Store, region: &Region, tag_slug: &str) -> Result<Vec<MapData>> {
    if store.tag_by_slug(region.id, tag_slug)?.is_none() {
        return Err(GeowikiError::not_found(EntityKind::Tag, tag_slug).into());
    }
    let mut records = store.map_data(&MapQuery {
        tag_slug: Some(tag_slug.to_string()),
        ..MapQuery::region(region.id)
    })?;
    sort_for_stacking(&mut records);
    Ok(records)
}

/// Records carrying `tag_slug` in any region, as map objects.
pub fn global_map_for_tag(store: &Store, tag_slug: &str) -> Result<Vec<MapObject>> {
    let mut records = store.map_data(&MapQuery {
        tag_slug: Some(tag_slug.to_string()),
        ..MapQuery::default()
    })?;
    sort_for_stacking(&mut records);
    let region_slugs = region_slugs(store)?;
    Ok(records
        .iter()
        .filter_map(|record| {
            region_slugs
                .get(&record.region_id)
                .map(|slug| map_object(slug, record))
        })
        .collect())
}

/// One centroid per record, unfiltered, for point-cluster views.
pub fn all_objects_as_points(store: &Store, region: Option<&Region>) -> Result<Vec<PointObject>> {
    let query = region.map(|region| MapQuery::region(region.id)).unwrap_or_default();
    let records = store.map_data(&query)?;
    let region_slugs = region_slugs(store)?;
    Ok(records
        .iter()
        .filter_map(|record| {
            let region_slug = region_slugs.get(&record.region_id)?;
            point_object(region_slug, record)
        })
        .collect())
}

/// Centroid of the record's geometry; `None` for empty geometry.
pub fn point_object(region_slug: &str, record: &MapData) -> Option<PointObject> {
    let centroid = record.geometry.centroid()?;
    Some(PointObject {
        page_name: record.page_name.clone(),
        page_url: page_url(region_slug, &record.page_slug),
        x: centroid.x(),
        y: centroid.y(),
    })
}

fn region_slugs(store: &Store) -> Result<HashMap<i64, String>> {
    Ok(store
        .regions()?
        .into_iter()
        .map(|region| (region.id, region.slug))
        .collect())
}
