use crate::types::{GeoFeature, MappedSet, NormalizedRecord, PropertyValue};
use std::collections::HashMap;
use tracing::{debug, info};

/// Records keyed by the value of their data join property.
#[derive(Debug, Clone, Default)]
pub struct RecordIndex {
    records: HashMap<String, NormalizedRecord>,
}

impl RecordIndex {
    /// Indexes `records` by `data_property`. Records without a usable key are
    /// skipped; on duplicate keys the later record wins.
    pub fn build(records: Vec<NormalizedRecord>, data_property: &str) -> Self {
        let mut index = HashMap::with_capacity(records.len());
        for record in records {
            match record.get(data_property).and_then(PropertyValue::join_key) {
                Some(key) => {
                    index.insert(key, record);
                }
                None => debug!(property = data_property, "record without join key skipped"),
            }
        }
        RecordIndex { records: index }
    }

    pub fn get(&self, key: &str) -> Option<&NormalizedRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Attaches record properties to every feature whose `geo_property` value
/// matches a record key. Every input feature appears once in the output, in
/// input order; record properties win on name clashes and unmatched records
/// are dropped.
pub fn join(mapping_id: &str, features: &[GeoFeature], index: &RecordIndex, geo_property: &str) -> MappedSet {
    let mut matched = 0usize;

    let features = features
        .iter()
        .map(|feature| {
            let record = feature
                .property(geo_property)
                .and_then(PropertyValue::join_key)
                .and_then(|key| index.get(&key));

            match record {
                Some(record) => {
                    matched += 1;
                    let mut joined = feature.clone();
                    joined.properties.extend(record.iter().map(|(k, v)| (k.clone(), v.clone())));
                    joined
                }
                None => feature.clone(),
            }
        })
        .collect::<Vec<_>>();

    info!(
        mapping = mapping_id,
        features = features.len(),
        records = index.len(),
        matched,
        "joined records to geometry"
    );

    MappedSet { mapping_id: mapping_id.to_string(), features }
}

/// Folds dated snapshots into one record per key. Each output record carries
/// the key under `data_property` and, for every snapshot containing that key,
/// the snapshot record as an inner map under its time key. Keys keep the order
/// of first appearance.
pub fn nest_by_time(snapshots: Vec<(String, Vec<NormalizedRecord>)>, data_property: &str) -> Vec<NormalizedRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut nested: HashMap<String, NormalizedRecord> = HashMap::new();

    for (time_key, records) in snapshots {
        for record in records {
            let Some(key_value) = record.get(data_property).cloned() else {
                continue;
            };
            let Some(key) = key_value.join_key() else {
                continue;
            };
            let entry = nested.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                NormalizedRecord::from([(data_property.to_string(), key_value)])
            });
            entry.insert(time_key.clone(), PropertyValue::Map(record));
        }
    }

    order.into_iter().filter_map(|key| nested.remove(&key)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{time_value, Properties};
    use proptest::prelude::*;

    fn feature(code: &str, name: &str) -> GeoFeature {
        GeoFeature {
            id: None,
            geometry: None,
            properties: Properties::from([
                ("cca_2".to_string(), PropertyValue::from(code)),
                ("name".to_string(), PropertyValue::from(name)),
            ]),
        }
    }

    fn record(code: &str, cases: f64) -> NormalizedRecord {
        Properties::from([
            ("RS".to_string(), PropertyValue::from(code)),
            ("cases".to_string(), PropertyValue::Number(cases)),
        ])
    }

    #[test]
    fn merges_matching_records_and_passes_others_through() {
        let features = vec![feature("01001", "Flensburg"), feature("02000", "Hamburg")];
        let index = RecordIndex::build(vec![record("01001", 42.0), record("99999", 1.0)], "RS");
        let set = join("cases", &features, &index, "cca_2");

        assert_eq!(set.features.len(), 2);
        assert_eq!(set.features[0].properties["cases"], PropertyValue::Number(42.0));
        assert_eq!(set.features[0].properties["name"], PropertyValue::from("Flensburg"));
        assert_eq!(set.features[1], features[1]);
    }

    #[test]
    fn record_properties_override_geo_properties() {
        let features = vec![feature("01001", "Flensburg")];
        let mut rec = record("01001", 1.0);
        rec.insert("name".into(), PropertyValue::from("SK Flensburg"));
        let set = join("cases", &features, &RecordIndex::build(vec![rec], "RS"), "cca_2");
        assert_eq!(set.features[0].properties["name"], PropertyValue::from("SK Flensburg"));
    }

    #[test]
    fn numeric_and_text_keys_meet() {
        let mut geo = feature("x", "Flensburg");
        geo.properties.insert("cca_2".into(), PropertyValue::Number(1001.0));
        let set = join("cases", &[geo], &RecordIndex::build(vec![record("1001", 5.0)], "RS"), "cca_2");
        assert_eq!(set.features[0].properties["cases"], PropertyValue::Number(5.0));
    }

    #[test]
    fn later_duplicate_record_wins() {
        let index = RecordIndex::build(vec![record("01001", 1.0), record("01001", 2.0)], "RS");
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("01001").unwrap()["cases"], PropertyValue::Number(2.0));
    }

    #[test]
    fn nests_snapshots_under_time_keys() {
        let snapshots = vec![
            ("2020-04-01".to_string(), vec![record("01001", 1.0), record("02000", 7.0)]),
            ("2020-04-02".to_string(), vec![record("01001", 3.0)]),
        ];
        let nested = nest_by_time(snapshots, "RS");
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[0]["RS"], PropertyValue::from("01001"));

        let set = join(
            "cases",
            &[feature("01001", "Flensburg"), feature("02000", "Hamburg")],
            &RecordIndex::build(nested, "RS"),
            "cca_2",
        );
        assert_eq!(time_value(&set.features[0], "cases", Some("2020-04-02")), Some(3.0));
        assert_eq!(time_value(&set.features[1], "cases", Some("2020-04-02")), None);
        assert_eq!(time_value(&set.features[1], "cases", Some("2020-04-01")), Some(7.0));
    }

    proptest! {
        #[test]
        fn join_is_total_and_idempotent(
            codes in prop::collection::vec("[0-9]{2}", 0..30),
            record_codes in prop::collection::vec("[0-9]{2}", 0..30),
        ) {
            let features: Vec<GeoFeature> = codes.iter().map(|c| feature(c, "x")).collect();
            let records: Vec<NormalizedRecord> = record_codes.iter().map(|c| record(c, 1.0)).collect();
            let index = RecordIndex::build(records, "RS");

            let first = join("m", &features, &index, "cca_2");
            let second = join("m", &features, &index, "cca_2");
            prop_assert_eq!(first.features.len(), features.len());
            prop_assert_eq!(&first, &second);

            for (out, original) in first.features.iter().zip(&features) {
                let code = original.properties["cca_2"].as_text().unwrap();
                if let Some(rec) = index.get(code) {
                    for (k, v) in rec {
                        prop_assert_eq!(&out.properties[k], v);
                    }
                }
            }
        }
    }
}
