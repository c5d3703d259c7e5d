//! Free-text place search over the mapped sets of the active visual.

use crate::config::SearchConfig;
use crate::registry::Registry;
use crate::types::{GeoFeature, MappedSet, MappedSets, PropertyValue, SearchOutcome, SearchResult};
use geo::Centroid;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lng: Option<f64>,
    pub lat: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("property `{0}` is missing")]
    MissingProperty(String),
    #[error("property `{0}` is not a coordinate pair")]
    Malformed(String),
    #[error("feature has no geometry")]
    NoGeometry,
    #[error("geometry cannot be converted: {0}")]
    Geometry(String),
    #[error("geometry has no centroid")]
    NoCentroid,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("coordinate extraction failed in `{dataset}`: {source}")]
pub struct SearchError {
    pub dataset: String,
    #[source]
    pub source: ExtractError,
}

pub trait CoordinateExtractor: Send + Sync {
    fn extract(&self, feature: &GeoFeature) -> Result<Position, ExtractError>;
}

/// Reads a `[lng, lat]` list stored in a feature property.
pub struct PropertyPoint {
    pub property: String,
}

impl CoordinateExtractor for PropertyPoint {
    fn extract(&self, feature: &GeoFeature) -> Result<Position, ExtractError> {
        let value = feature
            .property(&self.property)
            .ok_or_else(|| ExtractError::MissingProperty(self.property.clone()))?;
        let Some([lng, lat, ..]) = value.as_list() else {
            return Err(ExtractError::Malformed(self.property.clone()));
        };
        Ok(Position { lng: self.coordinate(lng)?, lat: self.coordinate(lat)? })
    }
}

impl PropertyPoint {
    // Null is an absent coordinate; anything else must be a finite number.
    fn coordinate(&self, value: &PropertyValue) -> Result<Option<f64>, ExtractError> {
        match value {
            PropertyValue::Null => Ok(None),
            other => match other.as_f64() {
                Some(n) if n.is_finite() => Ok(Some(n)),
                _ => Err(ExtractError::Malformed(self.property.clone())),
            },
        }
    }
}

pub struct GeometryCentroid;

impl CoordinateExtractor for GeometryCentroid {
    fn extract(&self, feature: &GeoFeature) -> Result<Position, ExtractError> {
        let geometry = feature.geometry.as_ref().ok_or(ExtractError::NoGeometry)?;
        let geometry = geo::Geometry::<f64>::try_from(geometry.value.clone())
            .map_err(|e| ExtractError::Geometry(e.to_string()))?;
        let point = geometry.centroid().ok_or(ExtractError::NoCentroid)?;
        Ok(Position { lng: Some(point.x()), lat: Some(point.y()) })
    }
}

pub trait QueryTransform: Send + Sync {
    fn apply(&self, query: &str) -> String;
}

pub struct Trim;

impl QueryTransform for Trim {
    fn apply(&self, query: &str) -> String {
        query.trim().to_string()
    }
}

pub struct CollapseWhitespace;

impl QueryTransform for CollapseWhitespace {
    fn apply(&self, query: &str) -> String {
        query.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

pub struct SearchTarget<'a> {
    pub id: &'a str,
    pub set: Option<&'a MappedSet>,
    pub properties: &'a [String],
    pub extractor: &'a dyn CoordinateExtractor,
}

pub struct SearchOptions<'a> {
    pub name_prop: &'a str,
    pub transform_query: Option<&'a dyn QueryTransform>,
}

/// Scans `targets` in order, yielding at most one result per target. The
/// first extractor failure aborts the scan.
pub fn default_search(
    query: &str,
    targets: &[SearchTarget<'_>],
    options: &SearchOptions<'_>,
) -> Result<Vec<SearchResult>, SearchError> {
    let transformed = match options.transform_query {
        Some(transform) => transform.apply(query),
        None => query.to_string(),
    };
    let needle = transformed.to_lowercase();
    // Intentional: a blank query would otherwise match every first feature.
    if needle.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut results = Vec::new();
    for target in targets {
        let Some(set) = target.set else {
            debug!(dataset = target.id, "mapped set not loaded, skipped");
            continue;
        };

        let mut missing_warned = HashSet::new();
        let found = set
            .features
            .iter()
            .find(|feature| feature_matches(feature, target.properties, &needle, &mut missing_warned));

        if let Some(feature) = found {
            let position = target.extractor.extract(feature).map_err(|source| {
                warn!(dataset = target.id, error = %source, "coordinate extraction failed, check search settings and geo data");
                SearchError { dataset: target.id.to_string(), source }
            })?;
            results.push(SearchResult {
                name: feature
                    .property(options.name_prop)
                    .and_then(PropertyValue::search_text)
                    .map(|name| name.into_owned())
                    .unwrap_or_default(),
                feature: feature.clone(),
                source: target.id.to_string(),
                lat: position.lat,
                lng: position.lng,
            });
        }
    }
    Ok(results)
}

fn feature_matches<'p>(
    feature: &GeoFeature,
    properties: &'p [String],
    needle: &str,
    missing_warned: &mut HashSet<&'p str>,
) -> bool {
    properties.iter().any(|prop| match feature.property(prop).and_then(PropertyValue::search_text) {
        Some(text) => text.to_lowercase().contains(needle),
        None => {
            if missing_warned.insert(prop.as_str()) {
                warn!(property = %prop, "searchable property not found in dataset, check search settings");
            }
            false
        }
    })
}

pub struct SearchContext<'a> {
    pub search: &'a SearchConfig,
    pub mapped_sets: &'a MappedSets,
    pub registry: &'a Registry,
}

pub trait SearchMethod: Send + Sync {
    fn search(&self, query: &str, ctx: &SearchContext<'_>) -> Result<Vec<SearchResult>, SearchError>;
}

pub struct DefaultSearch;

impl SearchMethod for DefaultSearch {
    fn search(&self, query: &str, ctx: &SearchContext<'_>) -> Result<Vec<SearchResult>, SearchError> {
        let mut targets = Vec::with_capacity(ctx.search.in_mappings.len());
        for mapping in &ctx.search.in_mappings {
            let Some(extractor) = ctx.registry.extractor(&mapping.coordinates) else {
                warn!(mapping = %mapping.id, extractor = %mapping.coordinates, "coordinate extractor not registered");
                return Ok(Vec::new());
            };
            targets.push(SearchTarget {
                id: &mapping.id,
                set: ctx.mapped_sets.get(&mapping.id),
                properties: &mapping.properties,
                extractor,
            });
        }

        let transform_query = ctx.search.transform_query.as_deref().and_then(|id| {
            let transform = ctx.registry.query_transform(id);
            if transform.is_none() {
                warn!(transform = id, "query transform not registered, using raw query");
            }
            transform
        });

        let options = SearchOptions { name_prop: &ctx.search.name_prop, transform_query };
        default_search(query, &targets, &options)
    }
}

/// Runs the visual's search method and classifies the results. Aborted
/// searches and unresolved methods report [`SearchOutcome::NoMatch`].
pub fn search(query: &str, ctx: &SearchContext<'_>) -> SearchOutcome {
    let method: &dyn SearchMethod = match ctx.search.method.as_deref() {
        Some(id) => match ctx.registry.search_method(id) {
            Some(method) => method,
            None => {
                warn!(method = id, "search method not registered");
                return SearchOutcome::NoMatch;
            }
        },
        None => &DefaultSearch,
    };

    match method.search(query, ctx) {
        Ok(results) => SearchOutcome::from_results(results),
        Err(error) => {
            warn!(%error, query, "search aborted");
            SearchOutcome::NoMatch
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    #[default]
    Idle,
    Searching,
    NoMatch,
    SingleMatch,
    MultipleMatches,
}

impl From<&SearchOutcome> for SearchPhase {
    fn from(outcome: &SearchOutcome) -> Self {
        match outcome {
            SearchOutcome::NoMatch => SearchPhase::NoMatch,
            SearchOutcome::SingleMatch(_) => SearchPhase::SingleMatch,
            SearchOutcome::MultipleMatches(_) => SearchPhase::MultipleMatches,
        }
    }
}
