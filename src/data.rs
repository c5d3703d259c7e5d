use crate::config::{MappingConfig, PayloadFormat};
use crate::types::{properties_from_json, GeoFeature, RawRecord};
use anyhow::{anyhow, bail, Context, Result};
use csv::ReaderBuilder;
use geojson::GeoJson;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Source of raw datasource payloads and geo files.
pub trait Fetch {
    fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

/// Resolves locations as paths below a base directory.
pub struct FileFetcher {
    base: PathBuf,
}

impl FileFetcher {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FileFetcher { base: base.into() }
    }
}

impl Fetch for FileFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        if location.starts_with("http://") || location.starts_with("https://") {
            bail!("Remote location {} cannot be read by the file fetcher", location);
        }
        let path = self.base.join(location.trim_start_matches('/'));
        debug!(path = ?path, "reading");
        fs::read(&path).with_context(|| format!("Failed to read {:?}", path))
    }
}

/// Fills the `{date}` placeholder of a datasource location.
pub fn resolve_url(template: &str, date: Option<&str>) -> String {
    match date {
        Some(date) => template.replace("{date}", date),
        None => template.to_string(),
    }
}

pub fn is_time_series(template: &str) -> bool {
    template.contains("{date}")
}

pub fn decode_payload(bytes: &[u8], format: PayloadFormat) -> Result<Value> {
    match format {
        PayloadFormat::Json => serde_json::from_slice(bytes).context("Failed to parse JSON payload"),
        PayloadFormat::Csv => decode_csv(bytes),
    }
}

/// Turns CSV rows into an array of objects. Cells that parse as numbers become
/// numbers, except zero-padded codes such as `01001`; empty cells become `null`.
fn decode_csv(bytes: &[u8]) -> Result<Value> {
    let mut rdr = ReaderBuilder::new().from_reader(bytes);
    let headers = rdr.headers().context("Failed to read CSV header")?.clone();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.context("Failed to read CSV row")?;
        let row: serde_json::Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.to_string(), csv_cell(cell)))
            .collect();
        rows.push(Value::Object(row));
    }
    Ok(Value::Array(rows))
}

fn csv_cell(cell: &str) -> Value {
    let cell = cell.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if cell.len() > 1 && cell.starts_with('0') && !cell.starts_with("0.") {
        return Value::String(cell.to_string());
    }
    match cell.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(cell.to_string()),
    }
}

pub fn decode_geo(bytes: &[u8]) -> Result<Vec<GeoFeature>> {
    let geojson = GeoJson::from_reader(bytes).context("Failed to parse GeoJSON")?;
    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc.features.into_iter().map(GeoFeature::from).collect()),
        GeoJson::Feature(feature) => Ok(vec![GeoFeature::from(feature)]),
        GeoJson::Geometry(_) => Err(anyhow!("GeoJSON must be a FeatureCollection")),
    }
}

/// Turns a decoded payload into raw records. `None` means there is nothing
/// to display for this mapping.
pub trait DataTransform: Send + Sync {
    fn transform(&self, payload: &Value, mapping: &MappingConfig) -> Option<Vec<RawRecord>>;
}

/// Takes the record array at a JSON pointer (the payload root by default).
/// The mapping's `records_path` takes precedence.
#[derive(Debug, Clone, Default)]
pub struct RecordsTransform {
    pointer: Option<String>,
}

impl RecordsTransform {
    pub fn at(pointer: &str) -> Self {
        RecordsTransform { pointer: Some(pointer.to_string()) }
    }
}

impl DataTransform for RecordsTransform {
    fn transform(&self, payload: &Value, mapping: &MappingConfig) -> Option<Vec<RawRecord>> {
        let pointer = mapping.records_path.as_deref().or(self.pointer.as_deref()).unwrap_or("");
        let Some(rows) = payload.pointer(pointer).and_then(Value::as_array) else {
            warn!(datasource = %mapping.datasource_id, pointer, "payload has no record array");
            return None;
        };
        if rows.is_empty() {
            return None;
        }
        let records: Vec<RawRecord> = rows
            .iter()
            .filter_map(|row| row.as_object().cloned().map(properties_from_json))
            .collect();
        Some(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyValue;
    use serde_json::json;

    fn mapping(records_path: Option<&str>) -> MappingConfig {
        MappingConfig {
            datasource_id: "d".into(),
            geo_id: "g".into(),
            geo_property: "cca_2".into(),
            data_property: "RS".into(),
            transform: "records".into(),
            records_path: records_path.map(str::to_string),
            normalize: vec![],
            norm_postfix: "_norm".into(),
            mappables: vec![],
            legend: None,
        }
    }

    #[test]
    fn resolves_date_templates() {
        assert_eq!(resolve_url("rki/{date}.json", Some("2020-04-01")), "rki/2020-04-01.json");
        assert_eq!(resolve_url("static.json", Some("2020-04-01")), "static.json");
        assert!(is_time_series("rki?date={date}"));
        assert!(!is_time_series("static.json"));
    }

    #[test]
    fn csv_cells_become_numbers_or_text() {
        let payload = decode_payload(b"RS,name,cases\n01001,Flensburg,12\n02000,Hamburg,\n", PayloadFormat::Csv).unwrap();
        assert_eq!(
            payload,
            json!([
                {"RS": "01001", "name": "Flensburg", "cases": 12.0},
                {"RS": "02000", "name": "Hamburg", "cases": null}
            ])
        );
    }

    #[test]
    fn records_transform_reads_pointer_and_reports_empty() {
        let payload = json!({"result": [{"RS": "01001", "cases": 3}]});
        let records = RecordsTransform::at("/result").transform(&payload, &mapping(None)).unwrap();
        assert_eq!(records[0]["cases"], PropertyValue::Number(3.0));

        assert!(RecordsTransform::at("/result").transform(&json!({"result": []}), &mapping(None)).is_none());
        assert!(RecordsTransform::default().transform(&payload, &mapping(None)).is_none());
        assert!(RecordsTransform::default().transform(&payload, &mapping(Some("/result"))).is_some());
    }

    #[test]
    fn geo_decoding_requires_features() {
        let fc = br#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":null,"properties":{"cca_2":"01001"}}]}"#;
        let features = decode_geo(fc).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].properties["cca_2"], PropertyValue::from("01001"));

        assert!(decode_geo(br#"{"type":"Point","coordinates":[1.0,2.0]}"#).is_err());
    }

    #[test]
    fn file_fetcher_reads_below_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), b"[]").unwrap();
        let fetcher = FileFetcher::new(dir.path());
        assert_eq!(fetcher.fetch("/a.json").unwrap(), b"[]");
        assert!(fetcher.fetch("missing.json").is_err());
        assert!(fetcher.fetch("https://example.org/a.json").is_err());
    }
}
