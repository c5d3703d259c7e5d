//! Turns search outcomes into store actions.

use crate::config::SearchConfig;
use crate::search::{self, SearchContext};
use crate::types::{GeoFeature, SearchOutcome, SearchResult};
use serde::Serialize;
use tracing::{debug, info};

pub const SEARCH_ZOOM: f64 = 9.5;
pub const FLY_DURATION_MS: u64 = 2500;
pub const DEFAULT_NOT_FOUND: &str = "Nothing found.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Viewport {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: f64,
    pub pitch: f64,
    pub bearing: f64,
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transition {
    pub duration_ms: u64,
    pub interpolator: Interpolator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interpolator {
    FlyTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnackbarMessage {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    SetViewport { viewport: Viewport },
    SetCurrentFeature { feature: GeoFeature, coordinates: [f64; 2] },
    SetSnackbarMessage { message: SnackbarMessage },
}

pub trait Dispatch {
    fn dispatch(&mut self, action: Action);
}

impl Dispatch for Vec<Action> {
    fn dispatch(&mut self, action: Action) {
        self.push(action);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "navigation", content = "results", rename_all = "snake_case")]
pub enum Navigation {
    Moved(SearchResult),
    NotFound,
    /// Several datasets matched; the candidates await disambiguation.
    Ambiguous(Vec<SearchResult>),
}

/// A single match without coordinates reports not-found like no match.
/// Multiple matches dispatch nothing.
pub fn apply_outcome(
    outcome: SearchOutcome,
    search: &SearchConfig,
    viewport: &Viewport,
    dispatch: &mut dyn Dispatch,
) -> Navigation {
    let not_found = |dispatch: &mut dyn Dispatch| {
        let text = search.not_found_message.as_deref().unwrap_or(DEFAULT_NOT_FOUND);
        dispatch.dispatch(Action::SetSnackbarMessage {
            message: SnackbarMessage { text: text.to_string(), kind: MessageKind::Error },
        });
        Navigation::NotFound
    };

    match outcome {
        SearchOutcome::NoMatch => not_found(dispatch),
        SearchOutcome::SingleMatch(result) => {
            let Some([lng, lat]) = result.lng_lat() else {
                debug!(name = %result.name, source = %result.source, "match has no coordinates");
                return not_found(dispatch);
            };
            info!(name = %result.name, source = %result.source, lat, lng, "flying to search result");
            dispatch.dispatch(Action::SetViewport {
                viewport: Viewport {
                    latitude: lat,
                    longitude: lng,
                    zoom: SEARCH_ZOOM,
                    transition: Some(Transition { duration_ms: FLY_DURATION_MS, interpolator: Interpolator::FlyTo }),
                    ..viewport.clone()
                },
            });
            dispatch.dispatch(Action::SetCurrentFeature { feature: result.feature.clone(), coordinates: [lng, lat] });
            Navigation::Moved(result)
        }
        SearchOutcome::MultipleMatches(results) => {
            debug!(candidates = results.len(), "search is ambiguous");
            Navigation::Ambiguous(results)
        }
    }
}

pub fn switch_view_to_place(
    query: &str,
    ctx: &SearchContext<'_>,
    viewport: &Viewport,
    dispatch: &mut dyn Dispatch,
) -> Navigation {
    let outcome = search::search(query, ctx);
    apply_outcome(outcome, ctx.search, viewport, dispatch)
}
