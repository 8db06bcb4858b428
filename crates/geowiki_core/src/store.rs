//! SQLite-backed page, tag, region and geometry store.
//!
//! Spatial predicates are not evaluated here: geometry leaves the store as decoded
//! [`MapGeometry`] and the map pipeline filters it in memory.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result, bail};
use geo::Point;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use tracing::warn;

use crate::error::{EntityKind, GeowikiError};
use crate::geometry::{GeometryWkt, MapGeometry, parse_area_wkt};
use crate::model::{FrontPage, MapData, NewRegion, Page, PageScore, Region, Tag};
use crate::runtime::MIGRATIONS_POLICY_MESSAGE;
use crate::schema;
use crate::slug::tag_slug;

const REGION_COLUMNS: &str =
    "id, slug, full_name, geom_wkt, center_x, center_y, default_zoom, is_meta_region";
const PAGE_COLUMNS: &str = "id, region_id, name, slug, content";
const TAG_COLUMNS: &str = "id, region_id, slug, name";

const HAS_TAG_SQL: &str = "SELECT 1 FROM page_tag_sets s
    JOIN page_tag_set_tags st ON st.tag_set_id = s.id
    JOIN tags t ON t.id = st.tag_id
    WHERE s.page_id = m.page_id";

/// Geometry row as persisted, before WKT decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMapData {
    pub id: i64,
    pub page_id: i64,
    pub region_id: i64,
    pub page_name: String,
    pub page_slug: String,
    pub wkt: GeometryWkt,
    pub length: f64,
}

impl StoredMapData {
    pub fn decode(self) -> Result<MapData> {
        let geometry = MapGeometry::from_wkt(&self.wkt)
            .with_context(|| format!("failed to decode geometry of page {}", self.page_slug))?;
        Ok(MapData {
            id: self.id,
            page_id: self.page_id,
            region_id: self.region_id,
            page_name: self.page_name,
            page_slug: self.page_slug,
            geometry,
            length: self.length,
        })
    }
}

/// Selection of geometry records; every set field narrows the result.
#[derive(Debug, Clone, Default)]
pub struct MapQuery {
    pub region_id: Option<i64>,
    /// Owning page carries a tag with this display name.
    pub tag_name: Option<String>,
    /// Owning page carries a tag with this slug.
    pub tag_slug: Option<String>,
    /// Owning page carries none of these tag slugs.
    pub exclude_tag_slugs: Vec<String>,
}

impl MapQuery {
    pub fn region(region_id: i64) -> Self {
        Self {
            region_id: Some(region_id),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub regions: usize,
    pub pages: usize,
    pub tags: usize,
    pub map_data: usize,
}

pub struct Store {
    connection: Connection,
}

impl Store {
    /// Open an existing database whose schema is current.
    pub fn open(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            bail!(
                "database not found at {}. {}",
                db_path.display(),
                MIGRATIONS_POLICY_MESSAGE
            );
        }
        let connection = schema::open_connection(db_path)?;
        let pending = schema::pending_on_connection(&connection)?;
        if pending > 0 {
            bail!("database schema is behind by {pending} migration(s). {MIGRATIONS_POLICY_MESSAGE}");
        }
        Ok(Self { connection })
    }

    /// Fresh, fully migrated in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        schema::configure_connection(&connection)?;
        schema::migrate_connection(&connection)?;
        Ok(Self { connection })
    }

    /// Run `work` inside a savepoint: all of its writes land, or none do.
    pub fn atomically<T>(&self, work: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.connection
            .execute_batch("SAVEPOINT geowiki_unit")
            .context("failed to create savepoint")?;
        match work(self) {
            Ok(value) => {
                self.connection
                    .execute_batch("RELEASE SAVEPOINT geowiki_unit")
                    .context("failed to release savepoint")?;
                Ok(value)
            }
            Err(err) => {
                let undo = self
                    .connection
                    .execute_batch("ROLLBACK TO SAVEPOINT geowiki_unit; RELEASE SAVEPOINT geowiki_unit");
                match undo {
                    Ok(()) => Err(err),
                    Err(undo_err) => {
                        warn!(error = %undo_err, "failed to roll back savepoint; unit writes may remain");
                        Err(err.context(format!("rollback also failed: {undo_err}")))
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            regions: self.count("SELECT COUNT(*) FROM regions")?,
            pages: self.count("SELECT COUNT(*) FROM pages")?,
            tags: self.count("SELECT COUNT(*) FROM tags")?,
            map_data: self.count("SELECT COUNT(*) FROM map_data")?,
        })
    }

    // Regions

    pub fn insert_region(&self, region: &NewRegion) -> Result<Region> {
        if region.slug.trim().is_empty() {
            return Err(GeowikiError::Validation("region slug cannot be empty".to_string()).into());
        }
        if let Some(wkt) = &region.geom_wkt {
            parse_area_wkt(wkt).with_context(|| format!("invalid outline for region {}", region.slug))?;
        }
        self.connection
            .execute(
                "INSERT INTO regions (slug, full_name, geom_wkt, center_x, center_y, default_zoom, is_meta_region)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    region.slug,
                    region.full_name,
                    region.geom_wkt,
                    region.center.map(|point| point.x()),
                    region.center.map(|point| point.y()),
                    i64::from(region.default_zoom),
                    region.is_meta_region,
                ],
            )
            .with_context(|| format!("failed to insert region {}", region.slug))?;
        self.region_by_id(self.connection.last_insert_rowid())
    }

    pub fn region_by_slug(&self, slug: &str) -> Result<Region> {
        self.connection
            .query_row(
                &format!("SELECT {REGION_COLUMNS} FROM regions WHERE slug = ?1"),
                [slug],
                region_from_row,
            )
            .optional()
            .with_context(|| format!("failed to look up region {slug}"))?
            .ok_or_else(|| GeowikiError::not_found(EntityKind::Region, slug).into())
    }

    pub fn region_by_id(&self, id: i64) -> Result<Region> {
        self.connection
            .query_row(
                &format!("SELECT {REGION_COLUMNS} FROM regions WHERE id = ?1"),
                [id],
                region_from_row,
            )
            .optional()
            .with_context(|| format!("failed to look up region #{id}"))?
            .ok_or_else(|| GeowikiError::not_found(EntityKind::Region, format!("#{id}")).into())
    }

    pub fn regions(&self) -> Result<Vec<Region>> {
        let mut statement = self
            .connection
            .prepare(&format!("SELECT {REGION_COLUMNS} FROM regions ORDER BY slug"))
            .context("failed to prepare region listing")?;
        let rows = statement
            .query_map([], region_from_row)
            .context("failed to list regions")?;
        collect_rows(rows)
    }

    // Pages

    pub fn page_by_slug(&self, region_id: i64, slug: &str) -> Result<Option<Page>> {
        self.connection
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE region_id = ?1 AND slug = ?2"),
                params![region_id, slug],
                page_from_row,
            )
            .optional()
            .with_context(|| format!("failed to look up page {slug}"))
    }

    pub fn insert_page(&self, region_id: i64, name: &str, slug: &str, content: &str) -> Result<Page> {
        self.connection
            .execute(
                "INSERT INTO pages (region_id, name, slug, content) VALUES (?1, ?2, ?3, ?4)",
                params![region_id, name, slug, content],
            )
            .with_context(|| format!("failed to insert page {slug}"))?;
        Ok(Page {
            id: self.connection.last_insert_rowid(),
            region_id,
            name: name.to_string(),
            slug: slug.to_string(),
            content: content.to_string(),
        })
    }

    pub fn update_page(&self, page: &Page) -> Result<()> {
        let affected = self
            .connection
            .execute(
                "UPDATE pages SET name = ?2, content = ?3 WHERE id = ?1",
                params![page.id, page.name, page.content],
            )
            .with_context(|| format!("failed to update page {}", page.slug))?;
        if affected == 0 {
            return Err(GeowikiError::not_found(EntityKind::Page, &page.slug).into());
        }
        Ok(())
    }

    /// Every page in the region, oldest first.
    pub fn pages_in_region(&self, region_id: i64) -> Result<Vec<Page>> {
        self.query_pages(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE region_id = ?1 ORDER BY id"),
            [region_id],
        )
    }

    pub fn template_pages(&self, region_id: i64) -> Result<Vec<Page>> {
        self.query_pages(
            &format!(
                "SELECT {PAGE_COLUMNS} FROM pages WHERE region_id = ?1 AND slug LIKE 'templates/%' ORDER BY id"
            ),
            [region_id],
        )
    }

    pub fn page_score(&self, page_id: i64) -> Result<Option<PageScore>> {
        self.connection
            .query_row(
                "SELECT page_id, score, content_length FROM page_scores WHERE page_id = ?1",
                [page_id],
                |row| {
                    Ok(PageScore {
                        page_id: row.get(0)?,
                        score: row.get(1)?,
                        content_length: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("failed to read page score")
    }

    pub fn set_page_score(&self, score: &PageScore) -> Result<()> {
        self.connection
            .execute(
                "INSERT INTO page_scores (page_id, score, content_length) VALUES (?1, ?2, ?3)
                 ON CONFLICT(page_id) DO UPDATE SET score = excluded.score, content_length = excluded.content_length",
                params![score.page_id, score.score, score.content_length],
            )
            .context("failed to write page score")?;
        Ok(())
    }

    // Tags

    pub fn tag_by_slug(&self, region_id: i64, slug: &str) -> Result<Option<Tag>> {
        self.connection
            .query_row(
                &format!("SELECT {TAG_COLUMNS} FROM tags WHERE region_id = ?1 AND slug = ?2"),
                params![region_id, slug],
                tag_from_row,
            )
            .optional()
            .with_context(|| format!("failed to look up tag {slug}"))
    }

    /// Create the tag named `name` in the region unless its slug already exists.
    pub fn ensure_tag(&self, region_id: i64, name: &str) -> Result<Tag> {
        let slug = tag_slug(name);
        if slug.is_empty() {
            return Err(GeowikiError::Validation(format!("tag name has no usable characters: {name:?}")).into());
        }
        self.connection
            .execute(
                "INSERT OR IGNORE INTO tags (region_id, slug, name) VALUES (?1, ?2, ?3)",
                params![region_id, slug, name.trim()],
            )
            .with_context(|| format!("failed to insert tag {slug}"))?;
        self.tag_by_slug(region_id, &slug)?
            .ok_or_else(|| GeowikiError::not_found(EntityKind::Tag, slug).into())
    }

    pub fn tag_set_id(&self, page_id: i64, region_id: i64) -> Result<Option<i64>> {
        self.connection
            .query_row(
                "SELECT id FROM page_tag_sets WHERE page_id = ?1 AND region_id = ?2",
                params![page_id, region_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up page tag set")
    }

    pub fn ensure_tag_set(&self, page_id: i64, region_id: i64) -> Result<i64> {
        if let Some(id) = self.tag_set_id(page_id, region_id)? {
            return Ok(id);
        }
        self.connection
            .execute(
                "INSERT INTO page_tag_sets (page_id, region_id) VALUES (?1, ?2)",
                params![page_id, region_id],
            )
            .context("failed to create page tag set")?;
        Ok(self.connection.last_insert_rowid())
    }

    /// Returns `true` when the tag was not yet in the set.
    pub fn add_tag_to_set(&self, tag_set_id: i64, tag_id: i64) -> Result<bool> {
        let inserted = self
            .connection
            .execute(
                "INSERT OR IGNORE INTO page_tag_set_tags (tag_set_id, tag_id) VALUES (?1, ?2)",
                params![tag_set_id, tag_id],
            )
            .context("failed to add tag to set")?;
        Ok(inserted > 0)
    }

    pub fn tag_page(&self, page: &Page, tag: &Tag) -> Result<bool> {
        let set_id = self.ensure_tag_set(page.id, page.region_id)?;
        self.add_tag_to_set(set_id, tag.id)
    }

    pub fn tags_for_page(&self, page_id: i64) -> Result<Vec<Tag>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT t.id, t.region_id, t.slug, t.name FROM tags t
                 JOIN page_tag_set_tags st ON st.tag_id = t.id
                 JOIN page_tag_sets s ON s.id = st.tag_set_id
                 WHERE s.page_id = ?1
                 ORDER BY t.name, t.id",
            )
            .context("failed to prepare page tag query")?;
        let rows = statement
            .query_map([page_id], tag_from_row)
            .context("failed to query page tags")?;
        collect_rows(rows)
    }

    /// Tag display names keyed by page id, optionally limited to one region.
    pub fn tag_names_by_page(&self, region_id: Option<i64>) -> Result<HashMap<i64, BTreeSet<String>>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT s.page_id, t.name FROM page_tag_sets s
                 JOIN page_tag_set_tags st ON st.tag_set_id = s.id
                 JOIN tags t ON t.id = st.tag_id
                 WHERE ?1 IS NULL OR s.region_id = ?1",
            )
            .context("failed to prepare tag name query")?;
        let mut rows = statement
            .query([region_id])
            .context("failed to query tag names")?;
        let mut output: HashMap<i64, BTreeSet<String>> = HashMap::new();
        while let Some(row) = rows.next().context("failed to read tag name row")? {
            let page_id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            output.entry(page_id).or_default().insert(name);
        }
        Ok(output)
    }

    /// Tags of a region that label at least one page, with their page counts, by slug.
    pub fn tag_page_counts(&self, region_id: i64) -> Result<Vec<(Tag, usize)>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT t.id, t.region_id, t.slug, t.name, COUNT(DISTINCT s.page_id) FROM tags t
                 JOIN page_tag_set_tags st ON st.tag_id = t.id
                 JOIN page_tag_sets s ON s.id = st.tag_set_id
                 WHERE t.region_id = ?1
                 GROUP BY t.id
                 HAVING COUNT(DISTINCT s.page_id) > 0
                 ORDER BY t.slug",
            )
            .context("failed to prepare tag count query")?;
        let rows = statement
            .query_map([region_id], |row| {
                let count: i64 = row.get(4)?;
                Ok((tag_from_row(row)?, usize::try_from(count).unwrap_or_default()))
            })
            .context("failed to query tag counts")?;
        collect_rows(rows)
    }

    pub fn pages_with_tag(&self, tag_id: i64) -> Result<Vec<Page>> {
        self.query_pages(
            "SELECT DISTINCT p.id, p.region_id, p.name, p.slug, p.content FROM pages p
             JOIN page_tag_sets s ON s.page_id = p.id
             JOIN page_tag_set_tags st ON st.tag_set_id = s.id
             WHERE st.tag_id = ?1
             ORDER BY p.name, p.id",
            [tag_id],
        )
    }

    /// Region pages carrying `tag_slug`, with their score when one exists.
    pub fn pages_with_tag_slug(&self, region_id: i64, tag_slug: &str) -> Result<Vec<(Page, Option<i64>)>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT DISTINCT p.id, p.region_id, p.name, p.slug, p.content, sc.score FROM pages p
                 JOIN page_tag_sets s ON s.page_id = p.id
                 JOIN page_tag_set_tags st ON st.tag_set_id = s.id
                 JOIN tags t ON t.id = st.tag_id
                 LEFT JOIN page_scores sc ON sc.page_id = p.id
                 WHERE p.region_id = ?1 AND t.slug = ?2
                 ORDER BY p.id",
            )
            .context("failed to prepare tagged page query")?;
        let rows = statement
            .query_map(params![region_id, tag_slug], |row| {
                Ok((page_from_row(row)?, row.get::<_, Option<i64>>(5)?))
            })
            .context("failed to query tagged pages")?;
        collect_rows(rows)
    }

    /// First tag, in any region, whose display name is exactly `name`.
    pub fn first_tag_named(&self, name: &str) -> Result<Option<Tag>> {
        self.connection
            .query_row(
                &format!("SELECT {TAG_COLUMNS} FROM tags WHERE name = ?1 ORDER BY id LIMIT 1"),
                [name],
                tag_from_row,
            )
            .optional()
            .with_context(|| format!("failed to look up tag named {name}"))
    }

    /// Distinct `(slug, name)` of in-use tags whose slug starts with `prefix`.
    pub fn tag_slugs_with_prefix(
        &self,
        prefix: &str,
        region_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(String, String)>> {
        let pattern = format!("{}%", escape_like(prefix));
        let limit = i64::try_from(limit).context("suggestion limit does not fit into i64")?;
        let mut statement = self
            .connection
            .prepare(
                "SELECT t.slug, MIN(t.name) FROM tags t
                 WHERE t.slug LIKE ?1 ESCAPE '\\'
                   AND (?2 IS NULL OR t.region_id = ?2)
                   AND EXISTS (SELECT 1 FROM page_tag_set_tags st WHERE st.tag_id = t.id)
                 GROUP BY t.slug
                 ORDER BY t.slug
                 LIMIT ?3",
            )
            .context("failed to prepare tag suggestion query")?;
        let rows = statement
            .query_map(params![pattern, region_id, limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to query tag suggestions")?;
        collect_rows(rows)
    }

    // Geometry

    pub fn stored_map_data_for_page(&self, page_id: i64) -> Result<Option<StoredMapData>> {
        let mut rows = self.query_stored_map_data(
            "SELECT m.id, m.page_id, m.region_id, p.name, p.slug, m.points_wkt, m.lines_wkt, m.polys_wkt, m.length
             FROM map_data m JOIN pages p ON p.id = m.page_id
             WHERE m.page_id = ?1",
            vec![Value::Integer(page_id)],
        )?;
        Ok(rows.pop())
    }

    pub fn map_data_for_page(&self, page_id: i64) -> Result<Option<MapData>> {
        self.stored_map_data_for_page(page_id)?
            .map(StoredMapData::decode)
            .transpose()
    }

    /// Persist `geometry` as the page's only geometry record. An empty geometry removes it.
    pub fn save_map_data(&self, page: &Page, geometry: &MapGeometry) -> Result<()> {
        if geometry.is_empty() {
            self.connection
                .execute("DELETE FROM map_data WHERE page_id = ?1", [page.id])
                .with_context(|| format!("failed to clear geometry of {}", page.slug))?;
            return Ok(());
        }
        let wkt = geometry.to_wkt();
        self.connection
            .execute(
                "INSERT INTO map_data (page_id, region_id, points_wkt, lines_wkt, polys_wkt, length)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(page_id) DO UPDATE SET
                    region_id = excluded.region_id,
                    points_wkt = excluded.points_wkt,
                    lines_wkt = excluded.lines_wkt,
                    polys_wkt = excluded.polys_wkt,
                    length = excluded.length",
                params![
                    page.id,
                    page.region_id,
                    wkt.points,
                    wkt.lines,
                    wkt.polys,
                    geometry.length_meters(),
                ],
            )
            .with_context(|| format!("failed to save geometry of {}", page.slug))?;
        Ok(())
    }

    /// Raw geometry rows matching `query`, ordered by id.
    pub fn stored_map_data(&self, query: &MapQuery) -> Result<Vec<StoredMapData>> {
        let mut sql = String::from(
            "SELECT m.id, m.page_id, m.region_id, p.name, p.slug, m.points_wkt, m.lines_wkt, m.polys_wkt, m.length
             FROM map_data m JOIN pages p ON p.id = m.page_id
             WHERE 1 = 1",
        );
        let mut values = Vec::new();
        if let Some(region_id) = query.region_id {
            values.push(Value::Integer(region_id));
            sql.push_str(&format!(" AND m.region_id = ?{}", values.len()));
        }
        if let Some(name) = &query.tag_name {
            values.push(Value::Text(name.clone()));
            sql.push_str(&format!(" AND EXISTS ({HAS_TAG_SQL} AND t.name = ?{})", values.len()));
        }
        if let Some(slug) = &query.tag_slug {
            values.push(Value::Text(slug.clone()));
            sql.push_str(&format!(" AND EXISTS ({HAS_TAG_SQL} AND t.slug = ?{})", values.len()));
        }
        if !query.exclude_tag_slugs.is_empty() {
            let mut placeholders = Vec::with_capacity(query.exclude_tag_slugs.len());
            for slug in &query.exclude_tag_slugs {
                values.push(Value::Text(slug.clone()));
                placeholders.push(format!("?{}", values.len()));
            }
            sql.push_str(&format!(
                " AND NOT EXISTS ({HAS_TAG_SQL} AND t.slug IN ({}))",
                placeholders.join(", ")
            ));
        }
        sql.push_str(" ORDER BY m.id");
        self.query_stored_map_data(&sql, values)
    }

    /// Decoded geometry records matching `query`; undecodable rows are logged and skipped.
    pub fn map_data(&self, query: &MapQuery) -> Result<Vec<MapData>> {
        let mut output = Vec::new();
        for stored in self.stored_map_data(query)? {
            let page_slug = stored.page_slug.clone();
            match stored.decode() {
                Ok(record) if record.geometry.is_empty() => {}
                Ok(record) => output.push(record),
                Err(err) => warn!(page = %page_slug, "skipping map data: {err:#}"),
            }
        }
        Ok(output)
    }

    // Front pages and files

    pub fn front_page(&self, region_id: i64) -> Result<Option<FrontPage>> {
        self.connection
            .query_row(
                "SELECT region_id, cover_photo FROM front_pages WHERE region_id = ?1",
                [region_id],
                |row| {
                    Ok(FrontPage {
                        region_id: row.get(0)?,
                        cover_photo: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("failed to look up front page")
    }

    pub fn save_front_page(&self, front_page: &FrontPage) -> Result<()> {
        self.connection
            .execute(
                "INSERT INTO front_pages (region_id, cover_photo) VALUES (?1, ?2)
                 ON CONFLICT(region_id) DO UPDATE SET cover_photo = excluded.cover_photo",
                params![front_page.region_id, front_page.cover_photo],
            )
            .context("failed to save front page")?;
        Ok(())
    }

    pub fn page_file_exists(&self, region_id: i64, page_slug: &str, name: &str) -> Result<bool> {
        let exists: i64 = self
            .connection
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM page_files WHERE region_id = ?1 AND page_slug = ?2 AND name = ?3)",
                params![region_id, page_slug, name],
                |row| row.get(0),
            )
            .context("failed to look up page file")?;
        Ok(exists == 1)
    }

    pub fn insert_page_file(&self, region_id: i64, page_slug: &str, name: &str) -> Result<()> {
        let inserted = self
            .connection
            .execute(
                "INSERT OR IGNORE INTO page_files (region_id, page_slug, name) VALUES (?1, ?2, ?3)",
                params![region_id, page_slug, name],
            )
            .context("failed to insert page file")?;
        if inserted == 0 {
            return Err(GeowikiError::Conflict(format!("file {name} already exists on {page_slug}")).into());
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn connection_for_tests(&self) -> &Connection {
        &self.connection
    }

    fn query_pages<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Page>> {
        let mut statement = self
            .connection
            .prepare(sql)
            .context("failed to prepare page query")?;
        let rows = statement
            .query_map(params, page_from_row)
            .context("failed to query pages")?;
        collect_rows(rows)
    }

    fn query_stored_map_data(&self, sql: &str, values: Vec<Value>) -> Result<Vec<StoredMapData>> {
        let mut statement = self
            .connection
            .prepare(sql)
            .context("failed to prepare map data query")?;
        let rows = statement
            .query_map(params_from_iter(values), |row| {
                Ok(StoredMapData {
                    id: row.get(0)?,
                    page_id: row.get(1)?,
                    region_id: row.get(2)?,
                    page_name: row.get(3)?,
                    page_slug: row.get(4)?,
                    wkt: GeometryWkt {
                        points: row.get(5)?,
                        lines: row.get(6)?,
                        polys: row.get(7)?,
                    },
                    length: row.get(8)?,
                })
            })
            .context("failed to query map data")?;
        collect_rows(rows)
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let value: i64 = self
            .connection
            .query_row(sql, [], |row| row.get(0))
            .with_context(|| format!("failed to run count query: {sql}"))?;
        usize::try_from(value).context("count does not fit into usize")
    }
}

fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to read rows")
}

fn region_from_row(row: &Row<'_>) -> rusqlite::Result<Region> {
    let center_x: Option<f64> = row.get(4)?;
    let center_y: Option<f64> = row.get(5)?;
    let default_zoom: i64 = row.get(6)?;
    Ok(Region {
        id: row.get(0)?,
        slug: row.get(1)?,
        full_name: row.get(2)?,
        geom_wkt: row.get(3)?,
        center: center_x.zip(center_y).map(|(x, y)| Point::new(x, y)),
        default_zoom: u8::try_from(default_zoom).unwrap_or(crate::config::DEFAULT_REGION_MAP_ZOOM),
        is_meta_region: row.get(7)?,
    })
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        id: row.get(0)?,
        region_id: row.get(1)?,
        name: row.get(2)?,
        slug: row.get(3)?,
        content: row.get(4)?,
    })
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        region_id: row.get(1)?,
        slug: row.get(2)?,
        name: row.get(3)?,
    })
}

fn escape_like(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            output.push('\\');
        }
        output.push(ch);
    }
    output
}
