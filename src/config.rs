use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub default_visual: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub map: MapSettings,
    #[serde(default)]
    pub datasources: BTreeMap<String, DatasourceConfig>,
    #[serde(default)]
    pub geos: BTreeMap<String, GeoConfig>,
    #[serde(default)]
    pub visuals: BTreeMap<String, VisualConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { port: default_port(), static_dir: None }
    }
}

/// Initial camera of the map.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct MapSettings {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: f64,
}

impl Default for MapSettings {
    fn default() -> Self {
        MapSettings { latitude: 51.1657, longitude: 10.4515, zoom: 5.0 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasourceConfig {
    /// Location template; `{date}` is replaced with the requested date string.
    pub url: String,
    #[serde(default)]
    pub format: PayloadFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeoConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VisualConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub default_mapping: Option<String>,
    #[serde(default)]
    pub mappings: BTreeMap<String, MappingConfig>,
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub layer_groups: Vec<LayerGroupConfig>,
    pub search: Option<SearchConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MappingConfig {
    pub datasource_id: String,
    pub geo_id: String,
    pub geo_property: String,
    pub data_property: String,
    #[serde(default = "default_transform")]
    pub transform: String,
    /// JSON pointer to the record array inside the payload.
    pub records_path: Option<String>,
    #[serde(default)]
    pub normalize: Vec<String>,
    #[serde(default = "default_norm_postfix")]
    pub norm_postfix: String,
    #[serde(default)]
    pub mappables: Vec<MappableConfig>,
    pub legend: Option<LegendConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MappableConfig {
    pub property: String,
    pub title: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LegendConfig {
    pub method: String,
    #[serde(default = "default_legend_samples")]
    pub samples: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LayerKind {
    Fill,
    FillExtrusion,
    Line,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LayerConfig {
    pub id: String,
    /// Mapping whose mapped set feeds this layer.
    pub source: String,
    pub kind: LayerKind,
    #[serde(default)]
    pub color_ramp: Vec<(f64, String)>,
    #[serde(default)]
    pub height_ramp: Vec<(f64, f64)>,
    pub opacity: Option<f64>,
    pub base: Option<f64>,
    pub line_color: Option<String>,
    pub line_width: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LayerGroupConfig {
    pub title: String,
    pub layers: Vec<String>,
    #[serde(default)]
    pub default: bool,
    pub pitch: Option<f64>,
    pub bearing: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default)]
    pub placeholder: String,
    #[serde(default = "default_name_prop")]
    pub name_prop: String,
    pub not_found_message: Option<String>,
    pub transform_query: Option<String>,
    /// Registered custom search method replacing the default scan.
    pub method: Option<String>,
    #[serde(default)]
    pub in_mappings: Vec<SearchMappingConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchMappingConfig {
    pub id: String,
    pub properties: Vec<String>,
    /// Registered coordinate extractor.
    pub coordinates: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_port() -> u16 {
    3000
}

fn default_transform() -> String {
    "records".to_string()
}

fn default_norm_postfix() -> String {
    "_norm".to_string()
}

fn default_legend_samples() -> usize {
    3
}

fn default_name_prop() -> String {
    "name".to_string()
}

/// A non-fatal configuration finding. Operations touching the affected part
/// degrade to empty results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    #[error("default visual `{0}` is not defined")]
    UnknownDefaultVisual(String),
    #[error("visual `{visual}`: default mapping `{mapping}` is not defined")]
    UnknownDefaultMapping { visual: String, mapping: String },
    #[error("visual `{visual}`, mapping `{mapping}`: datasource `{datasource}` is not defined")]
    UnknownDatasource { visual: String, mapping: String, datasource: String },
    #[error("visual `{visual}`, mapping `{mapping}`: geo `{geo}` is not defined")]
    UnknownGeo { visual: String, mapping: String, geo: String },
    #[error("visual `{visual}`, layer `{layer}`: source mapping `{mapping}` is not defined")]
    UnknownLayerSource { visual: String, layer: String, mapping: String },
    #[error("visual `{visual}`, layer group `{group}`: layer `{layer}` is not defined")]
    UnknownGroupLayer { visual: String, group: String, layer: String },
    #[error("visual `{visual}`: search refers to undefined mapping `{mapping}`")]
    UnknownSearchMapping { visual: String, mapping: String },
    #[error("visual `{visual}`: search in mapping `{mapping}` lists no properties")]
    EmptySearchProperties { visual: String, mapping: String },
    #[error("visual `{visual}`, layer `{layer}`: ramp thresholds must increase")]
    NonIncreasingRamp { visual: String, layer: String },
    #[error("visual `{visual}`, layer `{layer}`: `{color}` is not a hex color")]
    BadColor { visual: String, layer: String, color: String },
    #[error("{kind} `{id}` referenced by visual `{visual}` is not registered")]
    UnregisteredCapability { visual: String, kind: &'static str, id: String },
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    pub fn visual(&self, id: &str) -> Option<&VisualConfig> {
        self.visuals.get(id)
    }

    /// Checks cross references and ramp shapes. Every finding is logged as a
    /// warning and returned; nothing here is fatal.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if !self.visuals.contains_key(&self.default_visual) {
            issues.push(ConfigIssue::UnknownDefaultVisual(self.default_visual.clone()));
        }

        for (visual_id, visual) in &self.visuals {
            self.validate_visual(visual_id, visual, &mut issues);
        }

        for issue in &issues {
            warn!(%issue, "configuration problem");
        }
        issues
    }

    fn validate_visual(&self, visual_id: &str, visual: &VisualConfig, issues: &mut Vec<ConfigIssue>) {
        let visual_name = || visual_id.to_string();

        if let Some(mapping) = &visual.default_mapping {
            if !visual.mappings.contains_key(mapping) {
                issues.push(ConfigIssue::UnknownDefaultMapping {
                    visual: visual_name(),
                    mapping: mapping.clone(),
                });
            }
        }

        for (mapping_id, mapping) in &visual.mappings {
            if !self.datasources.contains_key(&mapping.datasource_id) {
                issues.push(ConfigIssue::UnknownDatasource {
                    visual: visual_name(),
                    mapping: mapping_id.clone(),
                    datasource: mapping.datasource_id.clone(),
                });
            }
            if !self.geos.contains_key(&mapping.geo_id) {
                issues.push(ConfigIssue::UnknownGeo {
                    visual: visual_name(),
                    mapping: mapping_id.clone(),
                    geo: mapping.geo_id.clone(),
                });
            }
        }

        for layer in &visual.layers {
            if !visual.mappings.contains_key(&layer.source) {
                issues.push(ConfigIssue::UnknownLayerSource {
                    visual: visual_name(),
                    layer: layer.id.clone(),
                    mapping: layer.source.clone(),
                });
            }
            let color_thresholds = layer.color_ramp.iter().map(|(t, _)| *t);
            let height_thresholds = layer.height_ramp.iter().map(|(t, _)| *t);
            if !strictly_increasing(color_thresholds) || !strictly_increasing(height_thresholds) {
                issues.push(ConfigIssue::NonIncreasingRamp {
                    visual: visual_name(),
                    layer: layer.id.clone(),
                });
            }
            let colors = layer.color_ramp.iter().map(|(_, c)| c).chain(layer.line_color.iter());
            for color in colors {
                if parse_hex_color(color).is_none() {
                    issues.push(ConfigIssue::BadColor {
                        visual: visual_name(),
                        layer: layer.id.clone(),
                        color: color.clone(),
                    });
                }
            }
        }

        for group in &visual.layer_groups {
            for layer in &group.layers {
                if !visual.layers.iter().any(|l| &l.id == layer) {
                    issues.push(ConfigIssue::UnknownGroupLayer {
                        visual: visual_name(),
                        group: group.title.clone(),
                        layer: layer.clone(),
                    });
                }
            }
        }

        if let Some(search) = &visual.search {
            for target in &search.in_mappings {
                if !visual.mappings.contains_key(&target.id) {
                    issues.push(ConfigIssue::UnknownSearchMapping {
                        visual: visual_name(),
                        mapping: target.id.clone(),
                    });
                }
                if target.properties.is_empty() {
                    issues.push(ConfigIssue::EmptySearchProperties {
                        visual: visual_name(),
                        mapping: target.id.clone(),
                    });
                }
            }
        }
    }
}

impl VisualConfig {
    /// Data field rendered when the client does not pick one: the mapping's
    /// default mappable, else its first mappable.
    pub fn default_field(&self, mapping_id: &str) -> Option<&str> {
        let mappables = &self.mappings.get(mapping_id)?.mappables;
        mappables
            .iter()
            .find(|m| m.default)
            .or_else(|| mappables.first())
            .map(|m| m.property.as_str())
    }

    /// The explicit default mapping, else the first one by id.
    pub fn primary_mapping(&self) -> Option<&str> {
        self.default_mapping
            .as_deref()
            .filter(|id| self.mappings.contains_key(*id))
            .or_else(|| self.mappings.keys().next().map(String::as_str))
    }
}

fn strictly_increasing(values: impl Iterator<Item = f64>) -> bool {
    let mut previous = f64::NEG_INFINITY;
    for value in values {
        if !(value > previous) {
            return false;
        }
        previous = value;
    }
    true
}

/// Parses `#rrggbb` (or `rrggbb`) into its channels.
pub fn parse_hex_color(hex: &str) -> Option<[u8; 3]> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some([r, g, b])
}
