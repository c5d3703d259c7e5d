//! Paint specifications and legends derived from layer ramps.
//!
//! Expressions follow the Mapbox GL style specification. The data input of
//! every ramp is wrapped in `to-number` with a zero fallback so features whose
//! value is missing or not finite (serialized as `null`) fall into the lowest
//! bucket instead of breaking the layer.

use crate::config::{LayerConfig, LayerKind, VisualConfig};
use crate::registry::Registry;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::warn;

/// Declarative styling for one layer, handed to the rendering surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSpec {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    pub paint: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub position: f64,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegendLabels {
    /// Sample index, `0..samples`.
    Index,
    /// Threshold value at the sample position.
    Value,
}

/// Lookup of `data_field`, inside the time-indexed map when `time_key` is set.
pub fn data_input(data_field: &str, time_key: Option<&str>) -> Value {
    let get = match time_key {
        Some(key) => json!(["get", data_field, ["get", key]]),
        None => json!(["get", data_field]),
    };
    json!(["to-number", get, 0])
}

/// Linear interpolation over `ramp`. `None` for an empty ramp.
pub fn interpolate<V: Serialize>(input: Value, ramp: &[(f64, V)]) -> Option<Value> {
    if ramp.is_empty() {
        return None;
    }
    let mut expr = vec![json!("interpolate"), json!(["linear"]), input];
    for (threshold, value) in ramp {
        expr.push(json!(threshold));
        expr.push(json!(value));
    }
    Some(Value::Array(expr))
}

pub fn derive_style(layer: &LayerConfig, data_field: &str, time_key: Option<&str>) -> LayerSpec {
    let mut paint = Map::new();
    let input = || data_input(data_field, time_key);

    match layer.kind {
        LayerKind::Fill => {
            insert_ramp(&mut paint, layer, "fill-color", interpolate(input(), &layer.color_ramp));
            insert_number(&mut paint, "fill-opacity", layer.opacity);
        }
        LayerKind::FillExtrusion => {
            insert_ramp(&mut paint, layer, "fill-extrusion-color", interpolate(input(), &layer.color_ramp));
            insert_ramp(&mut paint, layer, "fill-extrusion-height", interpolate(input(), &layer.height_ramp));
            insert_number(&mut paint, "fill-extrusion-base", layer.base);
            insert_number(&mut paint, "fill-extrusion-opacity", layer.opacity);
        }
        LayerKind::Line => {
            if let Some(color) = &layer.line_color {
                paint.insert("line-color".into(), json!(color));
            }
            // Outline only while the feature is hovered.
            let width = layer.line_width.unwrap_or(1.0);
            paint.insert(
                "line-width".into(),
                json!(["case", ["boolean", ["feature-state", "hover"], false], width, 0]),
            );
        }
    }

    LayerSpec {
        id: layer.id.clone(),
        source: layer.source.clone(),
        kind: layer.kind,
        paint,
    }
}

fn insert_ramp(paint: &mut Map<String, Value>, layer: &LayerConfig, key: &str, expr: Option<Value>) {
    match expr {
        Some(expr) => {
            paint.insert(key.to_string(), expr);
        }
        None => warn!(layer = %layer.id, property = key, "layer has no ramp for paint property"),
    }
}

fn insert_number(paint: &mut Map<String, Value>, key: &str, value: Option<f64>) {
    if let Some(value) = value {
        paint.insert(key.to_string(), json!(value));
    }
}

/// Paint specs for every layer of a visual, in configured order.
pub fn derive_layers(visual: &VisualConfig, data_field: &str, time_key: Option<&str>) -> Vec<LayerSpec> {
    visual
        .layers
        .iter()
        .map(|layer| derive_style(layer, data_field, time_key))
        .collect()
}

/// Samples the threshold domain of `ramp` at `samples` evenly spaced positions
/// in `[0, 1]`. An empty ramp gives an empty legend.
pub fn derive_legend<V>(ramp: &[(f64, V)], samples: usize, labels: LegendLabels) -> Vec<LegendEntry> {
    let (Some((low, _)), Some((high, _))) = (ramp.first(), ramp.last()) else {
        return Vec::new();
    };

    (0..samples)
        .map(|index| {
            let position = if samples > 1 {
                index as f64 / (samples - 1) as f64
            } else {
                0.0
            };
            let label = match labels {
                LegendLabels::Index => index.to_string(),
                LegendLabels::Value => format_label(low + position * (high - low)),
            };
            LegendEntry { position, label }
        })
        .collect()
}

/// Legend strategy selected by id from a mapping's `legend.method`.
pub trait LegendCalculator: Send + Sync {
    fn calculate(&self, ramp: &[(f64, String)], samples: usize) -> Vec<LegendEntry>;
}

/// Evenly spaced samples labelled by [`LegendLabels`].
pub struct EvenLegend(pub LegendLabels);

impl LegendCalculator for EvenLegend {
    fn calculate(&self, ramp: &[(f64, String)], samples: usize) -> Vec<LegendEntry> {
        derive_legend(ramp, samples, self.0)
    }
}

fn format_label(value: f64) -> String {
    let text = format!("{value:.3}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Legend for a mapping, computed from the color ramp of the first layer fed
/// by it. `None` when the mapping asks for no legend or its calculator is not
/// registered.
pub fn legend_for_mapping(visual: &VisualConfig, mapping_id: &str, registry: &Registry) -> Option<Vec<LegendEntry>> {
    let legend = visual.mappings.get(mapping_id)?.legend.as_ref()?;
    let Some(calculator) = registry.legend_calculator(&legend.method) else {
        warn!(mapping = mapping_id, method = %legend.method, "legend calculator not registered");
        return None;
    };
    let ramp = visual
        .layers
        .iter()
        .find(|layer| layer.source == mapping_id && !layer.color_ramp.is_empty())
        .map(|layer| layer.color_ramp.as_slice())
        .unwrap_or_default();
    Some(calculator.calculate(ramp, legend.samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_layer() -> LayerConfig {
        LayerConfig {
            id: "areas-fill".into(),
            source: "cases".into(),
            kind: LayerKind::Fill,
            color_ramp: vec![(0.0, "#f8fbff".into()), (0.5, "#3771b0".into()), (0.8, "#113068".into())],
            height_ramp: vec![],
            opacity: Some(0.8),
            base: None,
            line_color: None,
            line_width: None,
        }
    }

    #[test]
    fn fill_layer_interpolates_time_keyed_field() {
        let spec = derive_style(&fill_layer(), "cases_norm", Some("2020-04-01"));
        assert_eq!(spec.kind, LayerKind::Fill);
        assert_eq!(
            spec.paint["fill-color"],
            json!([
                "interpolate",
                ["linear"],
                ["to-number", ["get", "cases_norm", ["get", "2020-04-01"]], 0],
                0.0, "#f8fbff",
                0.5, "#3771b0",
                0.8, "#113068"
            ])
        );
        assert_eq!(spec.paint["fill-opacity"], json!(0.8));
    }

    #[test]
    fn extrusion_layer_has_color_and_height() {
        let mut layer = fill_layer();
        layer.kind = LayerKind::FillExtrusion;
        layer.height_ramp = vec![(0.0, 1000.0), (0.8, 160000.0)];
        layer.base = Some(1.0);
        let spec = derive_style(&layer, "cases_norm", None);
        assert!(spec.paint.contains_key("fill-extrusion-color"));
        assert_eq!(spec.paint["fill-extrusion-height"][2], json!(["to-number", ["get", "cases_norm"], 0]));
        assert_eq!(spec.paint["fill-extrusion-base"], json!(1.0));
        assert_eq!(serde_json::to_value(&spec).unwrap()["type"], json!("fill-extrusion"));
    }

    #[test]
    fn missing_ramp_omits_paint_property() {
        let mut layer = fill_layer();
        layer.color_ramp.clear();
        let spec = derive_style(&layer, "cases_norm", None);
        assert!(!spec.paint.contains_key("fill-color"));
    }

    #[test]
    fn legend_spans_unit_interval() {
        let ramp = fill_layer().color_ramp;
        let legend = derive_legend(&ramp, 3, LegendLabels::Index);
        let positions: Vec<f64> = legend.iter().map(|e| e.position).collect();
        let labels: Vec<&str> = legend.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(positions, vec![0.0, 0.5, 1.0]);
        assert_eq!(labels, vec!["0", "1", "2"]);
    }

    #[test]
    fn legend_value_labels_follow_domain() {
        let ramp = vec![(0.0, 1000.0), (2.0, 5000.0)];
        let legend = derive_legend(&ramp, 5, LegendLabels::Value);
        let labels: Vec<&str> = legend.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["0", "0.5", "1", "1.5", "2"]);
    }

    #[test]
    fn legend_edge_sizes() {
        let ramp = vec![(0.0, "#000000")];
        assert_eq!(derive_legend(&ramp, 1, LegendLabels::Index).len(), 1);
        assert!(derive_legend(&ramp, 0, LegendLabels::Index).is_empty());
        assert!(derive_legend::<&str>(&[], 3, LegendLabels::Value).is_empty());
    }
}
