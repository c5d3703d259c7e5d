use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Property mapping of a record or feature, ordered by name so that joined
/// output is structurally comparable.
pub type Properties = BTreeMap<String, PropertyValue>;

pub type RawRecord = Properties;

pub type NormalizedRecord = Properties;

/// JSON-like property value. Numbers are plain `f64` so non-finite results of
/// normalization survive until the rendering boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<PropertyValue>),
    Map(Properties),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Properties> {
        match self {
            PropertyValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// String form used to correlate features with records. Integral numbers
    /// print without a fractional part so `1001` and `"1001"` meet.
    pub fn join_key(&self) -> Option<String> {
        match self {
            PropertyValue::Text(s) => Some(s.clone()),
            PropertyValue::Number(n) if n.is_finite() => Some(format_number(*n)),
            _ => None,
        }
    }

    pub fn search_text(&self) -> Option<Cow<'_, str>> {
        match self {
            PropertyValue::Text(s) => Some(Cow::Borrowed(s)),
            PropertyValue::Number(n) if n.is_finite() => Some(Cow::Owned(format_number(*n))),
            _ => None,
        }
    }

    // Non-finite numbers become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::Null => serde_json::Value::Null,
            PropertyValue::Bool(b) => serde_json::Value::Bool(*b),
            PropertyValue::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            PropertyValue::Text(s) => serde_json::Value::String(s.clone()),
            PropertyValue::List(l) => serde_json::Value::Array(l.iter().map(Self::to_json).collect()),
            PropertyValue::Map(m) => serde_json::Value::Object(properties_to_json(m)),
        }
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => PropertyValue::Null,
            serde_json::Value::Bool(b) => PropertyValue::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(PropertyValue::Null, PropertyValue::Number),
            serde_json::Value::String(s) => PropertyValue::Text(s),
            serde_json::Value::Array(a) => PropertyValue::List(a.into_iter().map(Into::into).collect()),
            serde_json::Value::Object(o) => PropertyValue::Map(properties_from_json(o)),
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

pub fn properties_from_json(object: serde_json::Map<String, serde_json::Value>) -> Properties {
    object.into_iter().map(|(k, v)| (k, v.into())).collect()
}

pub fn properties_to_json(props: &Properties) -> serde_json::Map<String, serde_json::Value> {
    props.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoFeature {
    pub id: Option<geojson::feature::Id>,
    pub geometry: Option<geojson::Geometry>,
    pub properties: Properties,
}

impl GeoFeature {
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn to_geojson(&self) -> geojson::Feature {
        geojson::Feature {
            bbox: None,
            geometry: self.geometry.clone(),
            id: self.id.clone(),
            properties: Some(properties_to_json(&self.properties)),
            foreign_members: None,
        }
    }
}

impl From<geojson::Feature> for GeoFeature {
    fn from(feature: geojson::Feature) -> Self {
        GeoFeature {
            id: feature.id,
            geometry: feature.geometry,
            properties: feature.properties.map(properties_from_json).unwrap_or_default(),
        }
    }
}

impl Serialize for GeoFeature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_geojson().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappedSet {
    pub mapping_id: String,
    pub features: Vec<GeoFeature>,
}

impl MappedSet {
    pub fn to_feature_collection(&self) -> geojson::FeatureCollection {
        geojson::FeatureCollection {
            bbox: None,
            features: self.features.iter().map(GeoFeature::to_geojson).collect(),
            foreign_members: None,
        }
    }
}

pub type MappedSets = BTreeMap<String, MappedSet>;

/// Reads `field` from a feature, inside the inner map at `time_key` when one
/// is given. Absent entries and non-numeric values read as `None`.
pub fn time_value(feature: &GeoFeature, field: &str, time_key: Option<&str>) -> Option<f64> {
    let props = match time_key {
        Some(key) => feature.properties.get(key)?.as_map()?,
        None => &feature.properties,
    };
    props.get(field)?.as_f64()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub name: String,
    pub feature: GeoFeature,
    pub source: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl SearchResult {
    pub fn lng_lat(&self) -> Option<[f64; 2]> {
        match (self.lng, self.lat) {
            (Some(lng), Some(lat)) if lng.is_finite() && lat.is_finite() => Some([lng, lat]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "results", rename_all = "snake_case")]
pub enum SearchOutcome {
    NoMatch,
    SingleMatch(SearchResult),
    MultipleMatches(Vec<SearchResult>),
}

impl SearchOutcome {
    pub fn from_results(mut results: Vec<SearchResult>) -> Self {
        match results.len() {
            0 => SearchOutcome::NoMatch,
            1 => SearchOutcome::SingleMatch(results.remove(0)),
            _ => SearchOutcome::MultipleMatches(results),
        }
    }
}
