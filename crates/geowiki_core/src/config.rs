use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Disaster-response facility categories rendered as map overlays, in stacking order.
pub const DEFAULT_LAYER_NAMES: &[&str] = &[
    "國道",
    "省道",
    "鄉道",
    "鐵路",
    "取水點",
    "快速道路",
    "指揮中心",
    "消防單位",
    "警察單位",
    "醫療院所",
    "高速鐵路",
    "物資存備點",
    "海嘯危險區域",
    "直升機起降點",
    "老人福利機構",
    "適用地震災害",
    "適用水災災害",
    "適用海嘯災害",
    "人車轉運集結點",
    "室內避難收容所",
    "室外避難收容所",
    "救援器材放置點",
    "通訊設備放置點",
    "適用土石流災害",
    "海嘯避難收容處所",
    "身心障礙福利機構",
];

/// Administrative tags whose pages never show on general-purpose region maps.
pub const DEFAULT_EXCLUDED_TAG_SLUGS: &[&str] = &["zipcode", "supervisorialdistrict"];

pub const DEFAULT_CARD_CATEGORIES: &[&str] = &[
    "社區",
    "避難收容處所",
    "設備物資集結點",
    "特殊需求機構",
    "重要維生設施",
    "緊急聯絡網",
];

pub const DEFAULT_NAME_COLUMNS: &[&str] = &["名稱", "機構名稱"];
pub const DEFAULT_LATITUDE_COLUMNS: &[&str] = &["緯度", "Y"];
pub const DEFAULT_LONGITUDE_COLUMNS: &[&str] = &["經度", "X"];

pub const DEFAULT_REGION_MAP_ZOOM: u8 = 12;
pub const DEFAULT_POINT_SUPPRESSION_MAX_ZOOM: u8 = 14;
pub const DEFAULT_POINT_SUPPRESSION_MIN_POLYGONS: usize = 5;
pub const DEFAULT_MIN_LENGTH_BASE_METERS: f64 = 100.0;
pub const DEFAULT_ICON_URL_PREFIX: &str = "/static/tagicon/";
pub const DEFAULT_NEARBY_RADIUS_DEGREES: f64 = 0.3;
pub const DEFAULT_NEARBY_LIMIT: usize = 30;
pub const DEFAULT_KML_DOCUMENT_NAME: &str = "Export";
pub const DEFAULT_KML_FOLDER_NAME: &str = "Locations";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct GeowikiConfig {
    #[serde(default)]
    pub map: MapSection,
    #[serde(default)]
    pub nearby: NearbySection,
    #[serde(default)]
    pub migrate: MigrateSection,
    #[serde(default)]
    pub export: ExportSection,
    #[serde(default)]
    pub frontpage: FrontPageSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct MapSection {
    pub layer_names: Option<Vec<String>>,
    pub excluded_tag_slugs: Option<Vec<String>>,
    pub region_map_zoom: Option<u8>,
    pub point_suppression_max_zoom: Option<u8>,
    pub point_suppression_min_polygons: Option<usize>,
    pub min_length_base_meters: Option<f64>,
    pub icon_url_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct NearbySection {
    pub radius_degrees: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrateSection {
    pub name_columns: Option<Vec<String>>,
    pub latitude_columns: Option<Vec<String>>,
    pub longitude_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ExportSection {
    pub kml_document_name: Option<String>,
    pub kml_folder_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FrontPageSection {
    pub card_categories: Option<Vec<String>>,
}

/// Resolved map-pipeline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    pub layer_names: Vec<String>,
    pub excluded_tag_slugs: Vec<String>,
    pub region_map_zoom: u8,
    pub point_suppression_max_zoom: u8,
    pub point_suppression_min_polygons: usize,
    pub min_length_base_meters: f64,
    pub icon_url_prefix: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        GeowikiConfig::default().map_config()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyConfig {
    pub radius_degrees: f64,
    pub limit: usize,
}

impl Default for NearbyConfig {
    fn default() -> Self {
        Self {
            radius_degrees: DEFAULT_NEARBY_RADIUS_DEGREES,
            limit: DEFAULT_NEARBY_LIMIT,
        }
    }
}

/// Ordered column aliases; the first present, non-blank column wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateConfig {
    pub name_columns: Vec<String>,
    pub latitude_columns: Vec<String>,
    pub longitude_columns: Vec<String>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        GeowikiConfig::default().migrate_config()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    pub kml_document_name: String,
    pub kml_folder_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        GeowikiConfig::default().export_config()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontPageConfig {
    pub card_categories: Vec<String>,
}

impl Default for FrontPageConfig {
    fn default() -> Self {
        GeowikiConfig::default().frontpage_config()
    }
}

impl GeowikiConfig {
    pub fn map_config(&self) -> MapConfig {
        let section = &self.map;
        MapConfig {
            layer_names: owned_or_default(&section.layer_names, DEFAULT_LAYER_NAMES),
            excluded_tag_slugs: owned_or_default(
                &section.excluded_tag_slugs,
                DEFAULT_EXCLUDED_TAG_SLUGS,
            ),
            region_map_zoom: section.region_map_zoom.unwrap_or(DEFAULT_REGION_MAP_ZOOM),
            point_suppression_max_zoom: section
                .point_suppression_max_zoom
                .unwrap_or(DEFAULT_POINT_SUPPRESSION_MAX_ZOOM),
            point_suppression_min_polygons: section
                .point_suppression_min_polygons
                .unwrap_or(DEFAULT_POINT_SUPPRESSION_MIN_POLYGONS),
            min_length_base_meters: section
                .min_length_base_meters
                .unwrap_or(DEFAULT_MIN_LENGTH_BASE_METERS),
            icon_url_prefix: section
                .icon_url_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_ICON_URL_PREFIX.to_string()),
        }
    }

    /// Resolve nearby settings: env GEOWIKI_NEARBY_* > config > defaults.
    pub fn nearby_config(&self) -> NearbyConfig {
        self.nearby_config_with_lookup(|key| env::var(key).ok())
    }

    fn nearby_config_with_lookup<F>(&self, lookup_env: F) -> NearbyConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let radius_degrees = lookup_env("GEOWIKI_NEARBY_RADIUS")
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value > 0.0)
            .or(self.nearby.radius_degrees)
            .unwrap_or(DEFAULT_NEARBY_RADIUS_DEGREES);
        let limit = lookup_env("GEOWIKI_NEARBY_LIMIT")
            .and_then(|value| value.trim().parse::<usize>().ok())
            .or(self.nearby.limit)
            .unwrap_or(DEFAULT_NEARBY_LIMIT);
        NearbyConfig {
            radius_degrees,
            limit,
        }
    }

    pub fn migrate_config(&self) -> MigrateConfig {
        let section = &self.migrate;
        MigrateConfig {
            name_columns: owned_or_default(&section.name_columns, DEFAULT_NAME_COLUMNS),
            latitude_columns: owned_or_default(
                &section.latitude_columns,
                DEFAULT_LATITUDE_COLUMNS,
            ),
            longitude_columns: owned_or_default(
                &section.longitude_columns,
                DEFAULT_LONGITUDE_COLUMNS,
            ),
        }
    }

    pub fn export_config(&self) -> ExportConfig {
        ExportConfig {
            kml_document_name: self
                .export
                .kml_document_name
                .clone()
                .unwrap_or_else(|| DEFAULT_KML_DOCUMENT_NAME.to_string()),
            kml_folder_name: self
                .export
                .kml_folder_name
                .clone()
                .unwrap_or_else(|| DEFAULT_KML_FOLDER_NAME.to_string()),
        }
    }

    pub fn frontpage_config(&self) -> FrontPageConfig {
        FrontPageConfig {
            card_categories: owned_or_default(
                &self.frontpage.card_categories,
                DEFAULT_CARD_CATEGORIES,
            ),
        }
    }
}

/// Load and parse a GeowikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<GeowikiConfig> {
    if !config_path.exists() {
        return Ok(GeowikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: GeowikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn owned_or_default(value: &Option<Vec<String>>, default: &[&str]) -> Vec<String> {
    match value {
        Some(values) => values.clone(),
        None => default.iter().map(|value| (*value).to_string()).collect(),
    }
}
