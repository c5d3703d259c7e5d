//! `p<postfix> = p / (max - min)` over a record set. The minimum is not
//! subtracted.

use crate::types::{NormalizedRecord, PropertyValue, RawRecord};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    fn empty() -> Self {
        Range { min: f64::INFINITY, max: f64::NEG_INFINITY }
    }

    fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn factor(&self) -> f64 {
        1.0 / (self.max - self.min)
    }

    pub fn is_degenerate(&self) -> bool {
        self.max == self.min
    }
}

pub fn property_ranges(records: &[RawRecord], properties: &[String]) -> Vec<Range> {
    let mut ranges = vec![Range::empty(); properties.len()];
    for record in records {
        for (prop, range) in properties.iter().zip(ranges.iter_mut()) {
            if let Some(value) = record.get(prop).and_then(PropertyValue::as_f64) {
                range.include(value);
            }
        }
    }
    ranges
}

// A constant property gives an infinite factor; the inf/NaN results are kept.
pub fn normalize(records: &[RawRecord], properties: &[String], postfix: &str) -> Vec<NormalizedRecord> {
    if records.is_empty() {
        return Vec::new();
    }

    let factors: Vec<f64> = property_ranges(records, properties)
        .iter()
        .zip(properties)
        .map(|(range, prop)| {
            if range.is_degenerate() {
                debug!(property = %prop, value = range.min, "constant property, normalized values are not finite");
            }
            range.factor()
        })
        .collect();

    records
        .iter()
        .map(|record| {
            let mut normalized = record.clone();
            for (prop, factor) in properties.iter().zip(&factors) {
                if let Some(value) = record.get(prop).and_then(PropertyValue::as_f64) {
                    normalized.insert(format!("{prop}{postfix}"), PropertyValue::Number(value * factor));
                }
            }
            normalized
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Properties;
    use proptest::prelude::*;

    fn record(pairs: &[(&str, f64)]) -> RawRecord {
        pairs.iter().map(|(k, v)| (k.to_string(), PropertyValue::Number(*v))).collect()
    }

    fn props(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(normalize(&[], &props(&["cases"]), "_norm").is_empty());
    }

    #[test]
    fn scales_raw_value_without_subtracting_min() {
        let records = vec![record(&[("cases", 1.0)]), record(&[("cases", 5.0)])];
        let out = normalize(&records, &props(&["cases"]), "_norm");
        assert_eq!(out[0]["cases_norm"], PropertyValue::Number(0.25));
        assert_eq!(out[1]["cases_norm"], PropertyValue::Number(1.25));
        assert_eq!(out[0]["cases"], PropertyValue::Number(1.0));
    }

    #[test]
    fn constant_property_propagates_non_finite_values() {
        let records = vec![record(&[("deaths", 3.0)]), record(&[("deaths", 3.0)])];
        let out = normalize(&records, &props(&["deaths"]), "_norm");
        assert_eq!(out[0]["deaths_norm"], PropertyValue::Number(f64::INFINITY));

        let zero = vec![record(&[("deaths", 0.0)])];
        let out = normalize(&zero, &props(&["deaths"]), "_norm");
        assert!(out[0]["deaths_norm"].as_f64().unwrap().is_nan());
    }

    #[test]
    fn non_numeric_values_are_left_alone() {
        let mut odd = Properties::new();
        odd.insert("cases".into(), PropertyValue::Text("n/a".into()));
        let records = vec![record(&[("cases", 0.0)]), odd, record(&[("cases", 4.0)])];
        let out = normalize(&records, &props(&["cases"]), "_norm");
        assert!(!out[1].contains_key("cases_norm"));
        assert_eq!(out[2]["cases_norm"], PropertyValue::Number(1.0));
    }

    #[test]
    fn properties_are_independent() {
        let records = vec![
            record(&[("a", 0.0), ("b", 10.0)]),
            record(&[("a", 2.0), ("b", 14.0)]),
        ];
        let out = normalize(&records, &props(&["a", "b"]), "_n");
        assert_eq!(out[1]["a_n"], PropertyValue::Number(1.0));
        assert_eq!(out[1]["b_n"], PropertyValue::Number(3.5));
    }

    proptest! {
        #[test]
        fn normalized_values_are_raw_over_spread(values in prop::collection::vec(-1.0e6f64..1.0e6, 2..40)) {
            let records: Vec<RawRecord> = values.iter().map(|v| record(&[("p", *v)])).collect();
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assume!(max > min);

            let out = normalize(&records, &props(&["p"]), "_norm");
            let factor = 1.0 / (max - min);
            for (value, rec) in values.iter().zip(&out) {
                let norm = rec["p_norm"].as_f64().unwrap();
                prop_assert_eq!(norm, value * factor);
                prop_assert!(norm >= min * factor && norm <= max * factor);
            }
        }
    }
}
