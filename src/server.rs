use crate::config::{AppConfig, LayerGroupConfig, MappableConfig};
use crate::navigate::{self, Action, Dispatch, Navigation, SnackbarMessage, Viewport};
use crate::registry::Registry;
use crate::search::{self, SearchContext, SearchPhase};
use crate::state::{MapState, SelectedFeature};
use crate::style::{self, LayerSpec, LegendEntry};
use crate::types::{GeoFeature, MappedSets};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use geo::{BoundingRect, Contains, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

// Wrapper for RTree indexing
pub struct AreaIndex {
    mapping_id: String,
    index: usize,
    geometry: geo::Geometry<f64>,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for AreaIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub registry: Registry,
    /// Time key the layers read from, for time-series visuals.
    pub time_key: Option<String>,
    pub map: RwLock<MapState>,
    tree: RTree<AreaIndex>,
}

impl AppState {
    pub fn new(config: AppConfig, registry: Registry, map: MapState, time_key: Option<String>) -> Self {
        let tree = build_index(&map.mapped_sets);
        AppState { config, registry, time_key, map: RwLock::new(map), tree }
    }
}

/// Spatial index over the bounding boxes of every feature with a polygonal
/// geometry.
pub fn build_index(mapped_sets: &MappedSets) -> RTree<AreaIndex> {
    let mut items = Vec::new();
    for (mapping_id, set) in mapped_sets {
        for (index, feature) in set.features.iter().enumerate() {
            let Some(geometry) = feature.geometry.as_ref() else {
                continue;
            };
            let Ok(geometry) = geo::Geometry::<f64>::try_from(geometry.value.clone()) else {
                continue;
            };
            let Some(rect) = geometry.bounding_rect() else {
                continue;
            };
            items.push(AreaIndex {
                mapping_id: mapping_id.clone(),
                index,
                geometry,
                aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            });
        }
    }
    info!(features = items.len(), "spatial index built");
    RTree::bulk_load(items)
}

#[derive(Deserialize)]
pub struct LayerParams {
    field: Option<String>,
    time: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    q: String,
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
pub struct VisualSummary {
    id: String,
    name: String,
    description: String,
    default_mapping: Option<String>,
    layer_groups: Vec<LayerGroupConfig>,
    mappables: BTreeMap<String, Vec<MappableConfig>>,
    search_placeholder: Option<String>,
    time_key: Option<String>,
    viewport: Viewport,
    current_feature: Option<SelectedFeature>,
    snackbar: Option<SnackbarMessage>,
    search_phase: SearchPhase,
}

#[derive(Serialize)]
pub struct SearchResponse {
    navigation: Navigation,
    actions: Vec<Action>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    mapping: String,
    feature: GeoFeature,
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/api/visual", get(visual_handler))
        .route("/api/layers", get(layers_handler))
        .route("/api/mappings/:id", get(mapping_handler))
        .route("/api/legend/:mapping", get(legend_handler))
        .route("/api/search", get(search_handler))
        .route("/api/search/dismiss", post(dismiss_handler))
        .route("/api/layer-groups/:index", post(layer_group_handler))
        .route("/api/query", get(query_handler));

    if let Some(dir) = &state.config.server.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

pub async fn start_server(state: AppState) -> Result<()> {
    let port = state.config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting server on http://{}", addr);

    let app = router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn read_map(state: &AppState) -> Result<std::sync::RwLockReadGuard<'_, MapState>, StatusCode> {
    state.map.read().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn visual_summary(state: &AppState) -> Result<VisualSummary, StatusCode> {
    let map = read_map(state)?;
    let visual = state.config.visual(&map.visual_id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(VisualSummary {
        id: map.visual_id.clone(),
        name: visual.name.clone(),
        description: visual.description.clone(),
        default_mapping: visual.primary_mapping().map(str::to_string),
        layer_groups: visual.layer_groups.clone(),
        mappables: visual
            .mappings
            .iter()
            .map(|(id, mapping)| (id.clone(), mapping.mappables.clone()))
            .collect(),
        search_placeholder: visual.search.as_ref().map(|s| s.placeholder.clone()),
        time_key: state.time_key.clone(),
        viewport: map.viewport.clone(),
        current_feature: map.current_feature.clone(),
        snackbar: map.snackbar.clone(),
        search_phase: map.search_phase,
    })
}

pub fn layer_specs(state: &AppState, field: Option<&str>, time: Option<&str>) -> Result<Vec<LayerSpec>, StatusCode> {
    let map = read_map(state)?;
    let visual = state.config.visual(&map.visual_id).ok_or(StatusCode::NOT_FOUND)?;
    let field = field
        .or_else(|| visual.primary_mapping().and_then(|m| visual.default_field(m)))
        .ok_or(StatusCode::BAD_REQUEST)?;
    let time = time.or(state.time_key.as_deref());
    Ok(style::derive_layers(visual, field, time))
}

/// Applies the camera of the visual's layer group at `index`.
pub fn select_layer_group(state: &AppState, index: usize) -> Result<Viewport, StatusCode> {
    let mut map = state.map.write().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let visual = state.config.visual(&map.visual_id).ok_or(StatusCode::NOT_FOUND)?;
    let group = visual.layer_groups.get(index).ok_or(StatusCode::NOT_FOUND)?;
    info!(group = %group.title, "layer group selected");
    map.select_layer_group(group);
    Ok(map.viewport.clone())
}

/// Runs a search for the active visual and applies its actions to the shared
/// map state. Concurrent searches overwrite each other's viewport.
pub fn run_search(state: &AppState, query: &str) -> Result<SearchResponse, StatusCode> {
    let mut map = state.map.write().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let visual = state.config.visual(&map.visual_id).ok_or(StatusCode::NOT_FOUND)?;
    let Some(search_config) = visual.search.as_ref() else {
        warn!(visual = %map.visual_id, "visual has no search configuration");
        return Err(StatusCode::NOT_FOUND);
    };

    map.begin_search();
    let outcome = {
        let ctx = SearchContext { search: search_config, mapped_sets: &map.mapped_sets, registry: &state.registry };
        search::search(query, &ctx)
    };
    map.finish_search(&outcome);

    let mut actions: Vec<Action> = Vec::new();
    let navigation = navigate::apply_outcome(outcome, search_config, &map.viewport, &mut actions);
    for action in &actions {
        map.dispatch(action.clone());
    }
    Ok(SearchResponse { navigation, actions })
}

/// Feature whose geometry contains the point, first by mapping id.
pub fn feature_at(state: &AppState, lon: f64, lat: f64) -> Result<Option<QueryResponse>, StatusCode> {
    let map = read_map(state)?;
    let point = Point::new(lon, lat);
    let envelope = AABB::from_point([lon, lat]);

    let mut hits: Vec<&AreaIndex> = state
        .tree
        .locate_in_envelope_intersecting(&envelope)
        .filter(|candidate| candidate.geometry.contains(&point))
        .collect();
    hits.sort_by(|a, b| (&a.mapping_id, a.index).cmp(&(&b.mapping_id, b.index)));

    Ok(hits.first().and_then(|hit| {
        let feature = map.mapped_sets.get(&hit.mapping_id)?.features.get(hit.index)?;
        Some(QueryResponse { mapping: hit.mapping_id.clone(), feature: feature.clone() })
    }))
}

async fn visual_handler(State(state): State<Arc<AppState>>) -> Result<Json<VisualSummary>, StatusCode> {
    visual_summary(&state).map(Json)
}

async fn layers_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LayerParams>,
) -> Result<Json<Vec<LayerSpec>>, StatusCode> {
    layer_specs(&state, params.field.as_deref(), params.time.as_deref()).map(Json)
}

async fn mapping_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<geojson::FeatureCollection>, StatusCode> {
    let map = read_map(&state)?;
    let set = map.mapped_sets.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(set.to_feature_collection()))
}

async fn legend_handler(
    State(state): State<Arc<AppState>>,
    Path(mapping): Path<String>,
) -> Result<Json<Vec<LegendEntry>>, StatusCode> {
    let map = read_map(&state)?;
    let visual = state.config.visual(&map.visual_id).ok_or(StatusCode::NOT_FOUND)?;
    style::legend_for_mapping(visual, &mapping, &state.registry)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, StatusCode> {
    run_search(&state, &params.q).map(Json)
}

async fn dismiss_handler(State(state): State<Arc<AppState>>) -> Result<Json<SearchPhase>, StatusCode> {
    let mut map = state.map.write().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    map.reset_search();
    Ok(Json(map.search_phase))
}

async fn layer_group_handler(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<Viewport>, StatusCode> {
    select_layer_group(&state, index).map(Json)
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Option<QueryResponse>>, StatusCode> {
    feature_at(&state, params.lon, params.lat).map(Json)
}
