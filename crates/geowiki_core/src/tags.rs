use anyhow::Result;
use serde::Serialize;

use crate::error::{EntityKind, GeowikiError};
use crate::model::{Page, Region, Tag};
use crate::slug::tag_slug;
use crate::store::Store;

pub const SUGGESTION_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: Tag,
    pub pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedPages {
    pub tag: Tag,
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagSuggestion {
    pub slug: String,
    pub name: String,
}

/// Tags of the region in use by at least one page.
pub fn list_tags(store: &Store, region: &Region) -> Result<Vec<TagCount>> {
    Ok(store
        .tag_page_counts(region.id)?
        .into_iter()
        .map(|(tag, pages)| TagCount { tag, pages })
        .collect())
}

/// Pages carrying the tag; an unknown or unused tag is not found.
pub fn tagged_pages(store: &Store, region: &Region, slug: &str) -> Result<TaggedPages> {
    let slug = tag_slug(slug);
    let missing = || GeowikiError::not_found(EntityKind::Tag, format!("{}/{slug}", region.slug));
    let tag = store.tag_by_slug(region.id, &slug)?.ok_or_else(missing)?;
    let pages = store.pages_with_tag(tag.id)?;
    if pages.is_empty() {
        return Err(missing().into());
    }
    Ok(TaggedPages { tag, pages })
}

/// Tags whose slug starts with the folded `term`: the region's own first, then any region's.
pub fn suggest_tags(store: &Store, term: &str, region: Option<&Region>) -> Result<Vec<TagSuggestion>> {
    let prefix = tag_slug(term);
    if prefix.is_empty() {
        return Ok(Vec::new());
    }
    let mut suggestions = Vec::new();
    if let Some(region) = region {
        let local = store.tag_slugs_with_prefix(&prefix, Some(region.id), SUGGESTION_LIMIT)?;
        extend_suggestions(&mut suggestions, local);
    }
    if suggestions.len() < SUGGESTION_LIMIT {
        let global = store.tag_slugs_with_prefix(&prefix, None, SUGGESTION_LIMIT * 2)?;
        extend_suggestions(&mut suggestions, global);
    }
    Ok(suggestions)
}

fn extend_suggestions(suggestions: &mut Vec<TagSuggestion>, found: Vec<(String, String)>) {
    for (slug, name) in found {
        if suggestions.len() >= SUGGESTION_LIMIT {
            break;
        }
        if !suggestions.iter().any(|existing| existing.slug == slug) {
            suggestions.push(TagSuggestion { slug, name });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_not_found;
    use crate::model::NewRegion;
    use crate::store::tests::{seeded_store, tag};

    #[test]
    fn list_counts_only_used_tags() {
        let (store, region) = seeded_store();
        let a = store.insert_page(region.id, "A", "a", "").expect("a");
        let b = store.insert_page(region.id, "B", "b", "").expect("b");
        tag(&store, &a, "Shelter");
        tag(&store, &b, "Shelter");
        tag(&store, &b, "Hospital");
        store.ensure_tag(region.id, "Unused").expect("unused");

        let counts = list_tags(&store, &region).expect("list");
        let summary: Vec<_> = counts
            .iter()
            .map(|count| (count.tag.slug.as_str(), count.pages))
            .collect();
        assert_eq!(summary, vec![("hospital", 1), ("shelter", 2)]);
    }

    #[test]
    fn unused_or_unknown_tag_is_not_found() {
        let (store, region) = seeded_store();
        store.ensure_tag(region.id, "Unused").expect("unused");
        assert!(is_not_found(&tagged_pages(&store, &region, "unused").expect_err("unused")));
        assert!(is_not_found(&tagged_pages(&store, &region, "nope").expect_err("unknown")));

        let page = store.insert_page(region.id, "A", "a", "").expect("a");
        tag(&store, &page, "Unused");
        let tagged = tagged_pages(&store, &region, "Unused").expect("tagged");
        assert_eq!(tagged.pages, vec![page]);
    }

    #[test]
    fn suggestions_prefer_the_region_then_fill_globally() {
        let (store, region) = seeded_store();
        let other = store
            .insert_region(&NewRegion::named("yilan", "Yilan County"))
            .expect("region");
        let local = store.insert_page(region.id, "A", "a", "").expect("a");
        let remote = store.insert_page(other.id, "B", "b", "").expect("b");
        tag(&store, &local, "Shelter North");
        tag(&store, &remote, "Shelter East");
        tag(&store, &remote, "Shelter North");
        tag(&store, &remote, "Hospital");

        let suggestions = suggest_tags(&store, "shel", Some(&region)).expect("suggest");
        let slugs: Vec<_> = suggestions.iter().map(|item| item.slug.as_str()).collect();
        assert_eq!(slugs, vec!["shelternorth", "sheltereast"]);
        assert!(suggest_tags(&store, "  ", None).expect("blank").is_empty());
    }
}
