//! Region front page: either a plain page or a composite of cover map, layers and cards.

use std::cmp::Reverse;

use anyhow::Result;
use serde::Serialize;

use crate::config::{FrontPageConfig, MapConfig};
use crate::maps::layers::MapLayer;
use crate::maps::views::{PointObject, layers_by_tag_name, page_url, point_object};
use crate::model::{Page, Region, Tag};
use crate::slug::{FRONT_PAGE_SLUG, is_template_slug, tag_slug};
use crate::store::{MapQuery, Store};

pub const FRONT_PAGE_NAME: &str = "Front Page";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrontPageView {
    /// Plain page rendering of `front page`.
    Page { page: Page, exists: bool },
    Composite(CompositeFrontPage),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeFrontPage {
    pub region: String,
    pub cover: CoverMap,
    pub cover_photo: Option<String>,
    pub layers: Vec<MapLayer<PointObject>>,
    pub cards: Vec<CardCategory>,
    pub page: Page,
}

/// Region outline with its full name as caption.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverMap {
    pub title: String,
    pub geometry: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardCategory {
    pub name: String,
    pub tag: Tag,
    pub pages: Vec<CardPage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardPage {
    pub name: String,
    pub slug: String,
    pub url: String,
    pub score: i64,
}

pub fn front_page(
    store: &Store,
    region_slug: &str,
    map_config: &MapConfig,
    config: &FrontPageConfig,
) -> Result<FrontPageView> {
    let region = store.region_by_slug(region_slug)?;
    let front_page = store.front_page(region.id)?;
    let Some(front_page) = front_page.filter(|_| !region.is_meta_region) else {
        let (page, exists) = front_page_or_placeholder(store, &region)?;
        return Ok(FrontPageView::Page { page, exists });
    };

    let records = store.map_data(&MapQuery::region(region.id))?;
    let tag_names = store.tag_names_by_page(Some(region.id))?;
    let layers = layers_by_tag_name(&records, &map_config.layer_names, &tag_names, |record| record.page_id)
        .into_iter()
        .map(|layer| MapLayer {
            name: layer.name,
            records: layer
                .records
                .iter()
                .filter_map(|record| point_object(&region.slug, record))
                .collect(),
        })
        .collect();

    Ok(FrontPageView::Composite(CompositeFrontPage {
        region: region.slug.clone(),
        cover: CoverMap {
            title: region.full_name.clone(),
            geometry: region.geom_wkt.clone(),
        },
        cover_photo: front_page.cover_photo,
        layers,
        cards: cards(store, &region, config)?,
        page: front_page_or_placeholder(store, &region)?.0,
    }))
}

fn front_page_or_placeholder(store: &Store, region: &Region) -> Result<(Page, bool)> {
    Ok(match store.page_by_slug(region.id, FRONT_PAGE_SLUG)? {
        Some(page) => (page, true),
        None => (
            Page {
                id: 0,
                region_id: region.id,
                name: FRONT_PAGE_NAME.to_string(),
                slug: FRONT_PAGE_SLUG.to_string(),
                content: String::new(),
            },
            false,
        ),
    })
}

/// Configured categories that exist as a tag in any region, each with the region's scored
/// pages carrying it, best first.
fn cards(store: &Store, region: &Region, config: &FrontPageConfig) -> Result<Vec<CardCategory>> {
    let mut categories = Vec::new();
    for name in &config.card_categories {
        let Some(tag) = store.first_tag_named(name)? else {
            continue;
        };
        let mut pages: Vec<CardPage> = store
            .pages_with_tag_slug(region.id, &tag_slug(name))?
            .into_iter()
            .filter(|(page, _)| !is_template_slug(&page.slug) && page.slug != FRONT_PAGE_SLUG)
            .filter_map(|(page, score)| {
                Some(CardPage {
                    url: page_url(&region.slug, &page.slug),
                    score: score?,
                    name: page.name,
                    slug: page.slug,
                })
            })
            .collect();
        pages.sort_by(|a, b| (Reverse(a.score), &a.name).cmp(&(Reverse(b.score), &b.name)));
        categories.push(CardCategory {
            name: name.clone(),
            tag,
            pages,
        });
    }
    Ok(categories)
}
