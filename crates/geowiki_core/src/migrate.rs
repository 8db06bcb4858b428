//! Bulk CSV migration into region pages.
//!
//! A [`PageMigrator`] is configured with an optional template page and a set of tags, fed
//! rows, then run once. Every row is written inside its own savepoint: the page, its
//! score, its tags and its point geometry land together or not at all.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use geo::MultiPoint;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MigrateConfig;
use crate::error::GeowikiError;
use crate::geometry::{MapGeometry, parse_point_pair};
use crate::model::{Page, PageScore, Region, Tag};
use crate::slug::page_slug;
use crate::store::Store;
use crate::template::TemplateSchema;

/// One source row: column name to value, in column order.
pub type MigrationRow = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationError {
    /// 1-based data row number.
    pub row: usize,
    pub name: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationResult {
    /// Rows imported.
    pub total: usize,
    /// Pages created by this run.
    pub new: usize,
    pub errors: Vec<MigrationError>,
}

pub struct PageMigrator<'a> {
    store: &'a Store,
    region: &'a Region,
    config: MigrateConfig,
    template: Option<TemplateSchema>,
    tags: Vec<Tag>,
    records: Vec<MigrationRow>,
}

impl<'a> PageMigrator<'a> {
    pub fn new(store: &'a Store, region: &'a Region, config: MigrateConfig) -> Self {
        Self {
            store,
            region,
            config,
            template: None,
            tags: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn set_template(&mut self, page: &Page) {
        let schema = TemplateSchema::from_page(&page.name, &page.content);
        debug!(template = %schema.name, fields = schema.fields.len(), "template selected");
        self.template = Some(schema);
    }

    pub fn template(&self) -> Option<&TemplateSchema> {
        self.template.as_ref()
    }

    pub fn add_tag(&mut self, tag: Tag) {
        if !self.tags.iter().any(|existing| existing.id == tag.id) {
            self.tags.push(tag);
        }
    }

    /// Buffer a row; embedded newlines are removed from every value.
    pub fn add_record(&mut self, row: MigrationRow) {
        let row = row
            .into_iter()
            .map(|(key, value)| (key, value.replace('\n', "")))
            .collect();
        self.records.push(row);
    }

    /// Pick the template page named after one of `tag_slugs` and attach the region tags they
    /// name. Unknown slugs are ignored.
    pub fn configure_for_tags(&mut self, tag_slugs: &[String]) -> Result<()> {
        if let Some(template) = self.template_for_tags(tag_slugs)? {
            self.set_template(&template);
        }
        for slug in tag_slugs {
            if let Some(tag) = self.store.tag_by_slug(self.region.id, slug)? {
                self.add_tag(tag);
            }
        }
        Ok(())
    }

    /// First template page of the region whose short name is among `tag_slugs`.
    pub fn template_for_tags(&self, tag_slugs: &[String]) -> Result<Option<Page>> {
        Ok(self
            .store
            .template_pages(self.region.id)?
            .into_iter()
            .find(|page| {
                let schema = TemplateSchema::from_page(&page.name, "");
                tag_slugs.iter().any(|slug| *slug == schema.name)
            }))
    }

    /// Import every buffered row in input order; later duplicates overwrite earlier ones.
    pub fn migrate(&mut self) -> Result<MigrationResult> {
        let mut result = MigrationResult::default();
        let records = std::mem::take(&mut self.records);
        for (index, row) in records.iter().enumerate() {
            let row_number = index + 1;
            let Some(name) = resolve(row, &self.config.name_columns) else {
                debug!(row = row_number, "row has no name column, skipped");
                continue;
            };
            match self.store.atomically(|store| self.migrate_row(store, row, name)) {
                Ok(created) => {
                    result.total += 1;
                    if created {
                        result.new += 1;
                    }
                }
                Err(err) => {
                    warn!(row = row_number, name, "row not migrated: {err:#}");
                    result.errors.push(MigrationError {
                        row: row_number,
                        name: Some(name.to_string()),
                        message: format!("{err:#}"),
                    });
                }
            }
        }
        info!(
            region = %self.region.slug,
            total = result.total,
            new = result.new,
            errors = result.errors.len(),
            "migration finished"
        );
        Ok(result)
    }

    /// Returns whether the page was created.
    fn migrate_row(&self, store: &Store, row: &MigrationRow, name: &str) -> Result<bool> {
        let point = match (
            resolve(row, &self.config.longitude_columns),
            resolve(row, &self.config.latitude_columns),
        ) {
            (Some(longitude), Some(latitude)) => Some(parse_point_pair(longitude, latitude)?),
            _ => None,
        };

        let slug = page_slug(name);
        if slug.is_empty() {
            return Err(GeowikiError::Validation(format!("name has no usable characters: {name:?}")).into());
        }
        let (mut page, created) = match store.page_by_slug(self.region.id, &slug)? {
            Some(page) => (page, false),
            None => (store.insert_page(self.region.id, name, &slug, "")?, true),
        };

        if let Some(template) = &self.template
            && !template.fields.is_empty()
        {
            page.content = template.render(row);
            store.update_page(&page)?;
        }

        if store.page_score(page.id)?.is_none() {
            store.set_page_score(&PageScore {
                page_id: page.id,
                score: 1,
                content_length: i64::try_from(page.content.chars().count())
                    .context("content length does not fit into i64")?,
            })?;
        }

        if !self.tags.is_empty() {
            let set_id = store.ensure_tag_set(page.id, self.region.id)?;
            for tag in &self.tags {
                store.add_tag_to_set(set_id, tag.id)?;
            }
        }

        if let Some(point) = point {
            let mut geometry = store
                .map_data_for_page(page.id)?
                .map(|record| record.geometry)
                .unwrap_or_default();
            geometry.points = Some(MultiPoint::new(vec![point]));
            store.save_map_data(&page, &MapGeometry::new(geometry.points, geometry.lines, geometry.polys))?;
        }
        Ok(created)
    }
}

/// First alias column present in the row with a non-blank value.
fn resolve<'r>(row: &'r MigrationRow, aliases: &[String]) -> Option<&'r str> {
    aliases.iter().find_map(|alias| {
        row.iter()
            .find(|(key, _)| key == alias)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    })
}

/// Read CSV rows keyed by trimmed header names. A leading BOM is ignored; short rows are
/// padded with empty values.
pub fn read_csv_records(content: &str) -> Result<Vec<MigrationRow>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());
    let headers = reader
        .headers()
        .context("failed to read CSV header row")?
        .iter()
        .map(|header| header.trim().to_string())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("failed to read CSV row {}", index + 1))?;
        if record.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        let row = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !header.is_empty())
            .map(|(position, header)| {
                (header.clone(), record.get(position).unwrap_or_default().to_string())
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

pub fn read_csv_file(path: &Path) -> Result<Vec<MigrationRow>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read migration source {}", path.display()))?;
    read_csv_records(&content).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use geo::{LineString, MultiLineString, Point};

    use super::*;
    use crate::store::tests::seeded_store;

    fn row(pairs: &[(&str, &str)]) -> MigrationRow {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn shelter_row() -> MigrationRow {
        row(&[("名稱", "Shelter A"), ("緯度", "25.0"), ("經度", "121.5")])
    }

    #[test]
    fn shelter_row_creates_page_with_point() {
        let (store, region) = seeded_store();
        let mut migrator = PageMigrator::new(&store, &region, MigrateConfig::default());
        migrator.add_record(shelter_row());
        let result = migrator.migrate().expect("migrate");
        assert_eq!((result.total, result.new), (1, 1));
        assert!(result.errors.is_empty());

        let page = store
            .page_by_slug(region.id, "shelter a")
            .expect("lookup")
            .expect("page exists");
        assert_eq!(page.name, "Shelter A");
        let record = store.map_data_for_page(page.id).expect("map").expect("geometry");
        let points = record.geometry.points.expect("points");
        assert_eq!(points.0, vec![Point::new(121.5, 25.0)]);
        let score = store.page_score(page.id).expect("score").expect("scored");
        assert_eq!(score.score, 1);
    }

    #[test]
    fn projected_column_names_locate_the_page() {
        let (store, region) = seeded_store();
        let mut migrator = PageMigrator::new(&store, &region, MigrateConfig::default());
        migrator.add_record(row(&[("名稱", "Shelter A"), ("X", "121.5"), ("Y", "25.0")]));
        let result = migrator.migrate().expect("migrate");
        assert_eq!((result.total, result.new), (1, 1));
        assert!(result.errors.is_empty());

        let page = store
            .page_by_slug(region.id, "shelter a")
            .expect("lookup")
            .expect("page exists");
        assert_eq!(page.name, "Shelter A");
        let record = store.map_data_for_page(page.id).expect("map").expect("geometry");
        assert_eq!(record.geometry.points.expect("points").0, vec![Point::new(121.5, 25.0)]);
    }

    #[test]
    fn rerun_updates_without_creating() {
        let (store, region) = seeded_store();
        for expected_new in [1, 0] {
            let mut migrator = PageMigrator::new(&store, &region, MigrateConfig::default());
            migrator.add_record(shelter_row());
            let result = migrator.migrate().expect("migrate");
            assert_eq!(result.total, 1);
            assert_eq!(result.new, expected_new);
        }
        assert_eq!(store.pages_in_region(region.id).expect("pages").len(), 1);
    }

    #[test]
    fn rows_without_name_are_skipped_silently() {
        let (store, region) = seeded_store();
        let mut migrator = PageMigrator::new(&store, &region, MigrateConfig::default());
        migrator.add_record(row(&[("地址", "somewhere")]));
        migrator.add_record(row(&[("名稱", "  ")]));
        migrator.add_record(row(&[("機構名稱", "Clinic")]));
        let result = migrator.migrate().expect("migrate");
        assert_eq!((result.total, result.new), (1, 1));
        assert!(result.errors.is_empty());
    }

    #[test]
    fn malformed_coordinates_fail_only_their_row() {
        let (store, region) = seeded_store();
        let mut migrator = PageMigrator::new(&store, &region, MigrateConfig::default());
        migrator.add_record(row(&[("名稱", "Broken"), ("Y", "north"), ("X", "121.5")]));
        migrator.add_record(shelter_row());
        let result = migrator.migrate().expect("migrate");
        assert_eq!(result.total, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].row, 1);
        assert_eq!(result.errors[0].name.as_deref(), Some("Broken"));
        assert!(store.page_by_slug(region.id, "broken").expect("lookup").is_none());
    }

    #[test]
    fn template_and_tags_apply_to_every_row() {
        let (store, region) = seeded_store();
        store
            .insert_page(region.id, "Templates/shelter", "templates/shelter", "<p>{{名稱}}</p><p>{{電話}}</p>")
            .expect("template");
        store.ensure_tag(region.id, "Shelter").expect("tag");

        let mut migrator = PageMigrator::new(&store, &region, MigrateConfig::default());
        migrator
            .configure_for_tags(&["shelter".to_string(), "missing".to_string()])
            .expect("configure");
        assert_eq!(migrator.template().map(|schema| schema.name.as_str()), Some("shelter"));
        migrator.add_record(row(&[("名稱", "Shelter\nA"), ("電話", "03-1234")]));
        migrator.migrate().expect("first run");

        let page = store
            .page_by_slug(region.id, "sheltera")
            .expect("lookup")
            .expect("page");
        assert_eq!(page.content, "{{shelter|名稱=ShelterA|電話=03-1234}}");
        let score = store.page_score(page.id).expect("score").expect("scored");
        assert_eq!(score.content_length, page.content.chars().count() as i64);

        let mut again = PageMigrator::new(&store, &region, MigrateConfig::default());
        again.configure_for_tags(&["shelter".to_string()]).expect("configure");
        again.add_record(row(&[("名稱", "ShelterA")]));
        again.migrate().expect("second run");
        let tags = store.tags_for_page(page.id).expect("tags");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].slug, "shelter");
    }

    #[test]
    fn new_point_keeps_existing_lines() {
        let (store, region) = seeded_store();
        let page = store.insert_page(region.id, "Trail", "trail", "").expect("page");
        let line = MultiLineString::new(vec![LineString::from(vec![(121.0, 24.0), (121.1, 24.1)])]);
        store
            .save_map_data(&page, &MapGeometry::new(None, Some(line.clone()), None))
            .expect("line");

        let mut migrator = PageMigrator::new(&store, &region, MigrateConfig::default());
        migrator.add_record(row(&[("名稱", "Trail"), ("Y", "24.05"), ("X", "121.05")]));
        migrator.migrate().expect("migrate");
        let geometry = store
            .map_data_for_page(page.id)
            .expect("map")
            .expect("geometry")
            .geometry;
        assert_eq!(geometry.lines, Some(line));
        assert!(geometry.has_points());
    }

    #[test]
    fn csv_reader_strips_bom_and_keeps_quoted_newlines() {
        let content = "\u{feff}名稱 ,緯度,經度\n\"Shelter, North\",25.0,121.5\n,,\n\"Multi\nLine\",1\n";
        let rows = read_csv_records(content).expect("read");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], ("名稱".to_string(), "Shelter, North".to_string()));
        assert_eq!(rows[1][0].1, "Multi\nLine");
        assert_eq!(rows[1][2].1, "");
    }
}
