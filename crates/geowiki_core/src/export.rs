use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use geo::{LineString, Polygon};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{info, warn};
use zip::CompressionMethod;
use zip::write::FileOptions;

use crate::config::ExportConfig;
use crate::error::GeowikiError;
use crate::geometry::MapGeometry;
use crate::markup::html_to_text;
use crate::model::{Page, Region};
use crate::slug::is_template_slug;
use crate::store::{MapQuery, StoredMapData, Store};

const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    Csv,
    TextArchive,
    Kml,
    Json,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("csv") {
            return Ok(Self::Csv);
        }
        if value.eq_ignore_ascii_case("txt") || value.eq_ignore_ascii_case("text-archive") {
            return Ok(Self::TextArchive);
        }
        if value.eq_ignore_ascii_case("kml") {
            return Ok(Self::Kml);
        }
        if value.eq_ignore_ascii_case("json") {
            return Ok(Self::Json);
        }
        Err(GeowikiError::Validation(format!(
            "unknown export format {value:?} (expected csv, txt, kml or json)"
        ))
        .into())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::TextArchive => "txt",
            Self::Kml => "kml",
            Self::Json => "json",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::TextArchive => "application/zip",
            Self::Kml => "application/vnd.google-earth.kml+xml",
            Self::Json => "application/json",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::TextArchive => "zip",
            Self::Kml => "kml",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub extension: &'static str,
    /// Pages written into the artifact.
    pub items: usize,
}

impl ExportArtifact {
    fn new(format: ExportFormat, bytes: Vec<u8>, items: usize) -> Self {
        Self {
            bytes,
            mime_type: format.mime_type(),
            extension: format.extension(),
            items,
        }
    }

    /// `export.{ext}`, the download name offered to callers.
    pub fn file_name(&self) -> String {
        format!("export.{}", self.extension)
    }
}

/// Region pages outside the template namespace, oldest first.
pub fn exportable_pages(store: &Store, region: &Region) -> Result<Vec<Page>> {
    Ok(store
        .pages_in_region(region.id)?
        .into_iter()
        .filter(|page| !is_template_slug(&page.slug))
        .collect())
}

pub fn export(store: &Store, region: &Region, format: ExportFormat, config: &ExportConfig) -> Result<ExportArtifact> {
    let pages = exportable_pages(store, region)?;
    let artifact = match format {
        ExportFormat::Csv => export_csv(store, region, &pages)?,
        ExportFormat::TextArchive => export_text_archive(&pages)?,
        ExportFormat::Kml => export_kml(store, region, &pages, config)?,
        ExportFormat::Json => export_json(store, region, &pages)?,
    };
    info!(
        region = %region.slug,
        format = format.as_str(),
        items = artifact.items,
        bytes = artifact.bytes.len(),
        "export finished"
    );
    Ok(artifact)
}

/// Write `artifact` to `destination` through a uniquely named sibling temp file, so readers
/// never observe a partial file and concurrent exports never share scratch space.
pub fn write_artifact(artifact: &ExportArtifact, destination: &Path) -> Result<PathBuf> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create export directory {}", parent.display()))?;
    let mut temp = NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to create temporary file in {}", parent.display()))?;
    temp.write_all(&artifact.bytes)
        .context("failed to write export to temporary file")?;
    temp.flush().context("failed to flush export")?;
    temp.persist(destination)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to move export into {}", destination.display()))?;
    Ok(destination.to_path_buf())
}

fn joined_tags(tag_names: &HashMap<i64, BTreeSet<String>>, page_id: i64) -> String {
    tag_names
        .get(&page_id)
        .map(|names| names.iter().cloned().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

fn export_csv(store: &Store, region: &Region, pages: &[Page]) -> Result<ExportArtifact> {
    let tag_names = store.tag_names_by_page(Some(region.id))?;
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["id", "name", "slug", "tags", "region", "region_name", "content"])
        .context("failed to write CSV header")?;
    for page in pages {
        writer
            .write_record([
                page.id.to_string().as_str(),
                page.name.as_str(),
                page.slug.as_str(),
                joined_tags(&tag_names, page.id).as_str(),
                region.slug.as_str(),
                region.full_name.as_str(),
                page.content.as_str(),
            ])
            .with_context(|| format!("failed to write CSV row for {}", page.slug))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush CSV export: {}", err.error()))?;
    Ok(ExportArtifact::new(ExportFormat::Csv, bytes, pages.len()))
}

fn export_text_archive(pages: &[Page]) -> Result<ExportArtifact> {
    let mut archive = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for page in pages {
        archive
            .start_file(format!("{}.txt", page.id), options)
            .with_context(|| format!("failed to start archive entry for {}", page.slug))?;
        let body = html_to_text(&page.content)
            .with_context(|| format!("failed to convert {} to text", page.slug))?;
        let document = format!("## {}\n\n{}", page.name, body);
        archive
            .write_all(document.as_bytes())
            .with_context(|| format!("failed to write archive entry for {}", page.slug))?;
    }
    let cursor = archive.finish().context("failed to finish text archive")?;
    Ok(ExportArtifact::new(ExportFormat::TextArchive, cursor.into_inner(), pages.len()))
}

fn stored_geometry_by_page(store: &Store, region: &Region) -> Result<HashMap<i64, StoredMapData>> {
    Ok(store
        .stored_map_data(&MapQuery::region(region.id))?
        .into_iter()
        .map(|stored| (stored.page_id, stored))
        .collect())
}

fn decode_for_export(stored: &StoredMapData) -> Option<MapGeometry> {
    match stored.clone().decode() {
        Ok(record) if record.geometry.is_empty() => None,
        Ok(record) if !record.geometry.all_coords_finite() => {
            warn!(page = %stored.page_slug, "skipping geometry with non-finite coordinates");
            None
        }
        Ok(record) => Some(record.geometry),
        Err(err) => {
            warn!(page = %stored.page_slug, "skipping geometry: {err:#}");
            None
        }
    }
}

fn export_kml(store: &Store, region: &Region, pages: &[Page], config: &ExportConfig) -> Result<ExportArtifact> {
    let geometry = stored_geometry_by_page(store, region)?;
    let mut output = String::new();
    output.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(output, "<kml xmlns=\"{KML_NAMESPACE}\">");
    let _ = writeln!(
        output,
        "<Document id=\"0\"><name>{}</name>",
        escape_xml(&config.kml_document_name)
    );
    let _ = writeln!(
        output,
        "<Folder id=\"1\"><name>{}</name>",
        escape_xml(&config.kml_folder_name)
    );

    let mut placemarks = 0usize;
    for page in pages {
        let Some(stored) = geometry.get(&page.id) else {
            continue;
        };
        let Some(decoded) = decode_for_export(stored) else {
            continue;
        };
        let _ = writeln!(
            output,
            "<Placemark id=\"{}\"><name>{}</name>{}</Placemark>",
            page.id,
            escape_xml(&page.name),
            kml_geometry(&decoded)
        );
        placemarks += 1;
    }

    output.push_str("</Folder>\n</Document>\n</kml>\n");
    Ok(ExportArtifact::new(ExportFormat::Kml, output.into_bytes(), placemarks))
}

fn kml_geometry(geometry: &MapGeometry) -> String {
    let mut parts = Vec::new();
    if let Some(points) = &geometry.points {
        for point in &points.0 {
            parts.push(format!(
                "<Point><coordinates>{},{}</coordinates></Point>",
                point.x(),
                point.y()
            ));
        }
    }
    if let Some(lines) = &geometry.lines {
        for line in &lines.0 {
            parts.push(format!(
                "<LineString><coordinates>{}</coordinates></LineString>",
                kml_coordinates(line)
            ));
        }
    }
    if let Some(polys) = &geometry.polys {
        for polygon in &polys.0 {
            parts.push(kml_polygon(polygon));
        }
    }
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        format!("<MultiGeometry>{}</MultiGeometry>", parts.concat())
    }
}

fn kml_polygon(polygon: &Polygon<f64>) -> String {
    let mut output = format!(
        "<Polygon><outerBoundaryIs><LinearRing><coordinates>{}</coordinates></LinearRing></outerBoundaryIs>",
        kml_coordinates(polygon.exterior())
    );
    for interior in polygon.interiors() {
        let _ = write!(
            output,
            "<innerBoundaryIs><LinearRing><coordinates>{}</coordinates></LinearRing></innerBoundaryIs>",
            kml_coordinates(interior)
        );
    }
    output.push_str("</Polygon>");
    output
}

fn kml_coordinates(line: &LineString<f64>) -> String {
    line.0
        .iter()
        .map(|coord| format!("{},{}", coord.x, coord.y))
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_xml(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '"' => output.push_str("&quot;"),
            '\'' => output.push_str("&apos;"),
            _ => output.push(ch),
        }
    }
    output
}

#[derive(Debug, Serialize)]
struct JsonPage<'a> {
    id: i64,
    name: &'a str,
    slug: &'a str,
    tags: Vec<String>,
    region: &'a str,
    region_name: &'a str,
    content: &'a str,
    geometry: Option<String>,
}

fn export_json(store: &Store, region: &Region, pages: &[Page]) -> Result<ExportArtifact> {
    let tag_names = store.tag_names_by_page(Some(region.id))?;
    let geometry = stored_geometry_by_page(store, region)?;
    let items = pages
        .iter()
        .map(|page| JsonPage {
            id: page.id,
            name: &page.name,
            slug: &page.slug,
            tags: tag_names
                .get(&page.id)
                .map(|names| names.iter().cloned().collect())
                .unwrap_or_default(),
            region: &region.slug,
            region_name: &region.full_name,
            content: &page.content,
            geometry: geometry
                .get(&page.id)
                .and_then(decode_for_export)
                .map(|decoded| decoded.collection_wkt()),
        })
        .collect::<Vec<_>>();
    let bytes = serde_json::to_vec_pretty(&items).context("failed to serialize JSON export")?;
    Ok(ExportArtifact::new(ExportFormat::Json, bytes, items.len()))
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use rusqlite::params;
    use tempfile::tempdir;

    use super::*;
    use crate::store::tests::{page_with_geometry, seeded_store, tag};

    fn seeded_with_template() -> (Store, Region) {
        let (store, region) = seeded_store();
        store
            .insert_page(region.id, "Templates/Shelter", "templates/shelter", "{{名稱}}")
            .expect("template");
        let shelter = page_with_geometry(
            &store,
            &region,
            "Shelter A",
            &MapGeometry::from_point(121.5, 25.0),
        );
        tag(&store, &shelter, "Shelter");
        tag(&store, &shelter, "Accessible");
        store
            .insert_page(region.id, "Notes", "notes", "<p>Line, with \"quotes\"\nand newline</p>")
            .expect("notes");
        (store, region)
    }

    #[test]
    fn format_names_parse() {
        assert_eq!(ExportFormat::parse("CSV").expect("csv"), ExportFormat::Csv);
        assert_eq!(ExportFormat::parse("txt").expect("txt"), ExportFormat::TextArchive);
        assert_eq!(ExportFormat::parse("kml").expect("kml").mime_type(), "application/vnd.google-earth.kml+xml");
        let err = ExportFormat::parse("pdf").expect_err("unknown");
        assert!(matches!(err.downcast_ref::<GeowikiError>(), Some(GeowikiError::Validation(_))));
    }

    #[test]
    fn csv_excludes_templates_and_quotes_content() {
        let (store, region) = seeded_with_template();
        let artifact = export(&store, &region, ExportFormat::Csv, &ExportConfig::default()).expect("export");
        assert_eq!(artifact.mime_type, "text/csv");
        assert_eq!(artifact.items, 2);

        let mut reader = csv::Reader::from_reader(artifact.bytes.as_slice());
        let headers = reader.headers().expect("headers").clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["id", "name", "slug", "tags", "region", "region_name", "content"]
        );
        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .expect("rows");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| !row[2].starts_with("templates")));
        assert_eq!(&rows[0][3], "Accessible Shelter");
        assert_eq!(&rows[0][4], "hualien");
        assert_eq!(&rows[0][5], "Hualien County");
        assert_eq!(&rows[1][3], "");
        assert_eq!(&rows[1][6], "<p>Line, with \"quotes\"\nand newline</p>");
    }

    #[test]
    fn text_archive_has_one_document_per_page() {
        let (store, region) = seeded_with_template();
        let notes = store.page_by_slug(region.id, "notes").expect("lookup").expect("notes");
        let artifact = export(&store, &region, ExportFormat::TextArchive, &ExportConfig::default()).expect("export");
        assert_eq!(artifact.file_name(), "export.zip");

        let mut archive = zip::ZipArchive::new(Cursor::new(artifact.bytes)).expect("archive");
        assert_eq!(archive.len(), 2);
        let mut document = String::new();
        archive
            .by_name(&format!("{}.txt", notes.id))
            .expect("entry")
            .read_to_string(&mut document)
            .expect("read");
        assert!(document.starts_with("## Notes\n\n"), "{document}");
        assert!(document.contains("Line, with \"quotes\" and newline"), "{document}");
    }

    #[test]
    fn kml_has_placemarks_only_for_located_pages() {
        let (store, region) = seeded_with_template();
        let artifact = export(&store, &region, ExportFormat::Kml, &ExportConfig::default()).expect("export");
        let text = String::from_utf8(artifact.bytes).expect("utf8");
        assert_eq!(artifact.items, 1);
        assert_eq!(text.matches("<Placemark ").count(), 1);
        assert!(text.contains("<Document id=\"0\"><name>Export</name>"));
        assert!(text.contains("<Folder id=\"1\"><name>Locations</name>"));
        assert!(text.contains("<name>Shelter A</name><Point><coordinates>121.5,25</coordinates></Point>"));
    }

    #[test]
    fn kml_without_geometry_is_empty_not_an_error() {
        let (store, region) = seeded_store();
        store.insert_page(region.id, "Plain", "plain", "").expect("page");
        let artifact = export(&store, &region, ExportFormat::Kml, &ExportConfig::default()).expect("export");
        assert_eq!(artifact.items, 0);
        let text = String::from_utf8(artifact.bytes).expect("utf8");
        assert!(!text.contains("<Placemark"));
    }

    #[test]
    fn kml_skips_undecodable_geometry() {
        let (store, region) = seeded_with_template();
        let broken = store.insert_page(region.id, "Broken", "broken", "").expect("page");
        store
            .connection_for_tests()
            .execute(
                "INSERT INTO map_data (page_id, region_id, polys_wkt, length) VALUES (?1, ?2, 'MULTIPOLYGON (((1 1, 2', 0)",
                params![broken.id, region.id],
            )
            .expect("raw insert");
        let artifact = export(&store, &region, ExportFormat::Kml, &ExportConfig::default()).expect("export");
        assert_eq!(artifact.items, 1);
    }

    #[test]
    fn json_export_carries_tags_and_geometry() {
        let (store, region) = seeded_with_template();
        let artifact = export(&store, &region, ExportFormat::Json, &ExportConfig::default()).expect("export");
        let value: serde_json::Value = serde_json::from_slice(&artifact.bytes).expect("json");
        let items = value.as_array().expect("array");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["name"], "Shelter A");
        assert_eq!(items[0]["tags"], serde_json::json!(["Accessible", "Shelter"]));
        assert_eq!(items[0]["region_name"], "Hualien County");
        assert!(
            items[0]["geometry"]
                .as_str()
                .expect("wkt")
                .starts_with("GEOMETRYCOLLECTION")
        );
        assert!(items[1]["geometry"].is_null());
    }

    #[test]
    fn write_artifact_replaces_destination_atomically() {
        let temp = tempdir().expect("tempdir");
        let destination = temp.path().join("exports").join("hualien.csv");
        let first = ExportArtifact::new(ExportFormat::Csv, b"a\n".to_vec(), 1);
        let second = ExportArtifact::new(ExportFormat::Csv, b"b\n".to_vec(), 1);
        write_artifact(&first, &destination).expect("first write");
        write_artifact(&second, &destination).expect("second write");
        assert_eq!(fs::read(&destination).expect("read"), b"b\n");
        let leftovers = fs::read_dir(destination.parent().expect("parent"))
            .expect("list")
            .count();
        assert_eq!(leftovers, 1);
    }
}
