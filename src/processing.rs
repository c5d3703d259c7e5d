use crate::config::{AppConfig, MappingConfig};
use crate::data::{self, Fetch};
use crate::join::{self, RecordIndex};
use crate::normalize::normalize;
use crate::registry::Registry;
use crate::types::{GeoFeature, MappedSets, NormalizedRecord};
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{info, warn};

/// Builds the mapped set of every mapping of `visual_id`.
///
/// Time-series datasources are fetched once per entry of `dates` and nested
/// under each date as time key; static ones are fetched once. Mappings with
/// unresolved references or without data are left out. Fetch and decode
/// failures are errors.
pub fn load_visual(
    config: &AppConfig,
    registry: &Registry,
    fetcher: &dyn Fetch,
    visual_id: &str,
    dates: &[String],
) -> Result<MappedSets> {
    let mut mapped_sets = MappedSets::new();
    let Some(visual) = config.visual(visual_id) else {
        warn!(visual = visual_id, "visual is not defined");
        return Ok(mapped_sets);
    };

    info!(visual = visual_id, mappings = visual.mappings.len(), "loading visual");
    let mut geo_cache: HashMap<&str, Vec<GeoFeature>> = HashMap::new();

    for (mapping_id, mapping) in &visual.mappings {
        let Some(geo) = config.geos.get(&mapping.geo_id) else {
            warn!(mapping = %mapping_id, geo = %mapping.geo_id, "geo is not defined, mapping skipped");
            continue;
        };
        let Some(records) = load_records(config, registry, fetcher, mapping_id, mapping, dates)? else {
            info!(mapping = %mapping_id, "no data to display");
            continue;
        };

        if !geo_cache.contains_key(mapping.geo_id.as_str()) {
            let bytes = fetcher.fetch(&geo.url)?;
            let features = data::decode_geo(&bytes)
                .with_context(|| format!("Failed to decode geo `{}`", mapping.geo_id))?;
            info!(geo = %mapping.geo_id, features = features.len(), "loaded geometry");
            geo_cache.insert(&mapping.geo_id, features);
        }
        let features = &geo_cache[mapping.geo_id.as_str()];

        let index = RecordIndex::build(records, &mapping.data_property);
        let set = join::join(mapping_id, features, &index, &mapping.geo_property);
        mapped_sets.insert(mapping_id.clone(), set);
    }

    Ok(mapped_sets)
}

fn load_records(
    config: &AppConfig,
    registry: &Registry,
    fetcher: &dyn Fetch,
    mapping_id: &str,
    mapping: &MappingConfig,
    dates: &[String],
) -> Result<Option<Vec<NormalizedRecord>>> {
    let Some(datasource) = config.datasources.get(&mapping.datasource_id) else {
        warn!(mapping = mapping_id, datasource = %mapping.datasource_id, "datasource is not defined, mapping skipped");
        return Ok(None);
    };
    let Some(transform) = registry.transform(&mapping.transform) else {
        warn!(mapping = mapping_id, transform = %mapping.transform, "transform is not registered, mapping skipped");
        return Ok(None);
    };

    let fetch_normalized = |date: Option<&str>| -> Result<Option<Vec<NormalizedRecord>>> {
        let location = data::resolve_url(&datasource.url, date);
        let bytes = fetcher.fetch(&location)?;
        let payload = data::decode_payload(&bytes, datasource.format)
            .with_context(|| format!("Failed to decode datasource `{}` at {}", mapping.datasource_id, location))?;
        Ok(transform
            .transform(&payload, mapping)
            .map(|raw| normalize(&raw, &mapping.normalize, &mapping.norm_postfix)))
    };

    if !data::is_time_series(&datasource.url) {
        return fetch_normalized(None);
    }

    if dates.is_empty() {
        warn!(mapping = mapping_id, "time-series datasource needs at least one date, mapping skipped");
        return Ok(None);
    }

    let mut snapshots = Vec::with_capacity(dates.len());
    for date in dates {
        match fetch_normalized(Some(date))? {
            Some(records) => snapshots.push((date.clone(), records)),
            None => info!(mapping = mapping_id, date = %date, "no records for date"),
        }
    }
    if snapshots.is_empty() {
        return Ok(None);
    }
    Ok(Some(join::nest_by_time(snapshots, &mapping.data_property)))
}
