//! Capability table resolving the ids named in configuration to behaviour.
//!
//! Configuration stays plain data; anything that used to be a callable
//! (payload transform, coordinate extractor, query transform, search method,
//! legend calculator) is registered here under an id.

use crate::config::{AppConfig, ConfigIssue};
use crate::data::{DataTransform, RecordsTransform};
use crate::search::{CollapseWhitespace, CoordinateExtractor, GeometryCentroid, PropertyPoint, QueryTransform, SearchMethod, Trim};
use crate::style::{EvenLegend, LegendCalculator, LegendLabels};
use std::collections::HashMap;
use tracing::warn;

#[derive(Default)]
pub struct Registry {
    transforms: HashMap<String, Box<dyn DataTransform>>,
    extractors: HashMap<String, Box<dyn CoordinateExtractor>>,
    query_transforms: HashMap<String, Box<dyn QueryTransform>>,
    search_methods: HashMap<String, Box<dyn SearchMethod>>,
    legends: HashMap<String, Box<dyn LegendCalculator>>,
}

impl Registry {
    pub fn with_defaults() -> Self {
        let mut registry = Registry::default();
        registry.register_transform("records", RecordsTransform::default());
        registry.register_transform("result-array", RecordsTransform::at("/result"));
        registry.register_extractor("geo_point_2d", PropertyPoint { property: "geo_point_2d".to_string() });
        registry.register_extractor("centroid", GeometryCentroid);
        registry.register_query_transform("trim", Trim);
        registry.register_query_transform("collapse-whitespace", CollapseWhitespace);
        registry.register_legend("index", EvenLegend(LegendLabels::Index));
        registry.register_legend("value", EvenLegend(LegendLabels::Value));
        registry
    }

    pub fn register_transform(&mut self, id: &str, transform: impl DataTransform + 'static) {
        self.transforms.insert(id.to_string(), Box::new(transform));
    }

    pub fn register_extractor(&mut self, id: &str, extractor: impl CoordinateExtractor + 'static) {
        self.extractors.insert(id.to_string(), Box::new(extractor));
    }

    pub fn register_query_transform(&mut self, id: &str, transform: impl QueryTransform + 'static) {
        self.query_transforms.insert(id.to_string(), Box::new(transform));
    }

    pub fn register_search_method(&mut self, id: &str, method: impl SearchMethod + 'static) {
        self.search_methods.insert(id.to_string(), Box::new(method));
    }

    pub fn register_legend(&mut self, id: &str, calculator: impl LegendCalculator + 'static) {
        self.legends.insert(id.to_string(), Box::new(calculator));
    }

    pub fn transform(&self, id: &str) -> Option<&dyn DataTransform> {
        self.transforms.get(id).map(|t| t.as_ref())
    }

    pub fn extractor(&self, id: &str) -> Option<&dyn CoordinateExtractor> {
        self.extractors.get(id).map(|e| e.as_ref())
    }

    pub fn query_transform(&self, id: &str) -> Option<&dyn QueryTransform> {
        self.query_transforms.get(id).map(|t| t.as_ref())
    }

    pub fn search_method(&self, id: &str) -> Option<&dyn SearchMethod> {
        self.search_methods.get(id).map(|m| m.as_ref())
    }

    pub fn legend_calculator(&self, id: &str) -> Option<&dyn LegendCalculator> {
        self.legends.get(id).map(|l| l.as_ref())
    }

    /// Capability ids in `config` that resolve to nothing. Logged as warnings.
    pub fn check(&self, config: &AppConfig) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut require = |visual: &str, kind: &'static str, id: &str, known: bool| {
            if !known {
                issues.push(ConfigIssue::UnregisteredCapability {
                    visual: visual.to_string(),
                    kind,
                    id: id.to_string(),
                });
            }
        };

        for (visual_id, visual) in &config.visuals {
            for mapping in visual.mappings.values() {
                require(visual_id, "transform", &mapping.transform, self.transforms.contains_key(&mapping.transform));
                if let Some(legend) = &mapping.legend {
                    require(visual_id, "legend", &legend.method, self.legends.contains_key(&legend.method));
                }
            }
            if let Some(search) = &visual.search {
                for target in &search.in_mappings {
                    let known = self.extractors.contains_key(&target.coordinates);
                    require(visual_id, "coordinate extractor", &target.coordinates, known);
                }
                if let Some(id) = &search.transform_query {
                    require(visual_id, "query transform", id, self.query_transforms.contains_key(id));
                }
                if let Some(id) = &search.method {
                    require(visual_id, "search method", id, self.search_methods.contains_key(id));
                }
            }
        }

        for issue in &issues {
            warn!(%issue, "configuration problem");
        }
        issues
    }
}
