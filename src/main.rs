use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use statmap::config::AppConfig;
use statmap::data::FileFetcher;
use statmap::navigate::{self, Action};
use statmap::registry::Registry;
use statmap::search::SearchContext;
use statmap::state::MapState;
use statmap::types::MappedSets;
use statmap::{processing, server, style};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the configuration for dangling references and bad ramps
    Validate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Join, normalize and style a visual, writing GeoJSON and layer specs
    Build {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Visual to build; defaults to the configured default visual
        #[arg(short, long)]
        visual: Option<String>,
        /// Dates for time-series datasources, the last one is displayed
        #[arg(short, long = "date")]
        dates: Vec<String>,
        #[arg(short, long, value_name = "DIR", default_value = "out")]
        out: PathBuf,
    },
    /// Search a place in the visual and print the resulting actions
    Search {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long)]
        visual: Option<String>,
        #[arg(short, long = "date")]
        dates: Vec<String>,
        query: String,
    },
    /// Serve the visual over HTTP
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long)]
        visual: Option<String>,
        #[arg(short, long = "date")]
        dates: Vec<String>,
    },
}

#[derive(Serialize)]
struct SearchReport {
    navigation: navigate::Navigation,
    actions: Vec<Action>,
}

struct Loaded {
    config: AppConfig,
    registry: Registry,
    visual_id: String,
    mapped_sets: MappedSets,
}

fn load(config_path: &Path, visual: Option<String>, dates: &[String]) -> Result<Loaded> {
    let config = AppConfig::load_from_file(config_path)?;
    let registry = Registry::with_defaults();
    // Issues are logged; loading goes on and skips what cannot resolve.
    config.validate();
    registry.check(&config);

    let visual_id = visual.unwrap_or_else(|| config.default_visual.clone());
    if config.visual(&visual_id).is_none() {
        bail!("Visual `{}` is not defined in {:?}", visual_id, config_path);
    }

    let base = config_path.parent().unwrap_or(Path::new(".")).join(&config.data_dir);
    let fetcher = FileFetcher::new(base);
    let mapped_sets = processing::load_visual(&config, &registry, &fetcher, &visual_id, dates)?;
    info!(visual = %visual_id, mappings = mapped_sets.len(), "visual loaded");

    Ok(Loaded { config, registry, visual_id, mapped_sets })
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let mut issues = app_config.validate();
            issues.extend(Registry::with_defaults().check(&app_config));
            if !issues.is_empty() {
                for issue in &issues {
                    println!("{}", issue);
                }
                bail!("{} configuration issue(s) in {:?}", issues.len(), config);
            }
            println!("{:?} is valid", config);
        }
        Commands::Build { config, visual, dates, out } => {
            let loaded = load(&config, visual, &dates)?;
            let Some(visual) = loaded.config.visual(&loaded.visual_id) else {
                bail!("Visual `{}` disappeared", loaded.visual_id);
            };
            fs::create_dir_all(&out).with_context(|| format!("Failed to create {:?}", out))?;

            for (mapping_id, set) in &loaded.mapped_sets {
                write_json(&out.join(format!("{}.geojson", mapping_id)), &set.to_feature_collection())?;
                if let Some(legend) = style::legend_for_mapping(visual, mapping_id, &loaded.registry) {
                    write_json(&out.join(format!("{}.legend.json", mapping_id)), &legend)?;
                }
            }

            let field = visual.primary_mapping().and_then(|m| visual.default_field(m));
            match field {
                Some(field) => {
                    let layers = style::derive_layers(visual, field, dates.last().map(String::as_str));
                    write_json(&out.join("layers.json"), &layers)?;
                }
                None => warn!(visual = %loaded.visual_id, "no default mappable, layers not written"),
            }
            info!(out = ?out, "build complete");
        }
        Commands::Search { config, visual, dates, query } => {
            let loaded = load(&config, visual, &dates)?;
            let Some(search) = loaded.config.visual(&loaded.visual_id).and_then(|v| v.search.as_ref()) else {
                bail!("Visual `{}` has no search configuration", loaded.visual_id);
            };
            let state = MapState::new(&loaded.visual_id, loaded.mapped_sets, loaded.config.map);
            let ctx = SearchContext { search, mapped_sets: &state.mapped_sets, registry: &loaded.registry };

            let mut actions: Vec<Action> = Vec::new();
            let navigation = navigate::switch_view_to_place(&query, &ctx, &state.viewport, &mut actions);
            println!("{}", serde_json::to_string_pretty(&SearchReport { navigation, actions })?);
        }
        Commands::Serve { config, visual, dates } => {
            let loaded = load(&config, visual, &dates)?;
            let map = MapState::new(&loaded.visual_id, loaded.mapped_sets, loaded.config.map);
            let state = server::AppState::new(loaded.config, loaded.registry, map, dates.last().cloned());
            server::start_server(state).await?;
        }
    }

    Ok(())
}
