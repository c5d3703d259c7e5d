use crate::config::{LayerGroupConfig, MapSettings};
use crate::navigate::{Action, Dispatch, SnackbarMessage, Viewport};
use crate::search::SearchPhase;
use crate::types::{GeoFeature, MappedSets, SearchOutcome};
use serde::Serialize;
use tracing::debug;

/// Holds the active visual, its derived mapped sets and the UI-facing state
/// that search actions write to.
#[derive(Debug, Clone, Serialize)]
pub struct MapState {
    pub visual_id: String,
    #[serde(skip)]
    pub mapped_sets: MappedSets,
    pub viewport: Viewport,
    pub current_feature: Option<SelectedFeature>,
    pub snackbar: Option<SnackbarMessage>,
    pub search_phase: SearchPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedFeature {
    pub feature: GeoFeature,
    pub coordinates: [f64; 2],
}

impl MapState {
    pub fn new(visual_id: &str, mapped_sets: MappedSets, settings: MapSettings) -> Self {
        MapState {
            visual_id: visual_id.to_string(),
            mapped_sets,
            viewport: Viewport {
                latitude: settings.latitude,
                longitude: settings.longitude,
                zoom: settings.zoom,
                pitch: 0.0,
                bearing: 0.0,
                transition: None,
            },
            current_feature: None,
            snackbar: None,
            search_phase: SearchPhase::Idle,
        }
    }

    /// Applies the camera of a layer group.
    pub fn select_layer_group(&mut self, group: &LayerGroupConfig) {
        self.viewport.pitch = group.pitch.unwrap_or(0.0);
        self.viewport.bearing = group.bearing.unwrap_or(0.0);
    }

    pub fn begin_search(&mut self) {
        self.search_phase = SearchPhase::Searching;
        self.snackbar = None;
    }

    pub fn finish_search(&mut self, outcome: &SearchOutcome) {
        self.search_phase = SearchPhase::from(outcome);
    }

    /// Back to `Idle` once the user has seen the outcome.
    pub fn reset_search(&mut self) {
        self.search_phase = SearchPhase::Idle;
        self.snackbar = None;
    }
}

impl Dispatch for MapState {
    fn dispatch(&mut self, action: Action) {
        debug!(?action, "dispatch");
        match action {
            Action::SetViewport { viewport } => self.viewport = viewport,
            Action::SetCurrentFeature { feature, coordinates } => {
                self.current_feature = Some(SelectedFeature { feature, coordinates });
            }
            Action::SetSnackbarMessage { message } => self.snackbar = Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigate::{Interpolator, MessageKind, Transition};
    use crate::types::Properties;

    fn state() -> MapState {
        MapState::new("rki", MappedSets::new(), MapSettings::default())
    }

    #[test]
    fn later_viewport_wins() {
        let mut state = state();
        for lat in [53.55, 48.13] {
            state.dispatch(Action::SetViewport {
                viewport: Viewport {
                    latitude: lat,
                    transition: Some(Transition { duration_ms: 2500, interpolator: Interpolator::FlyTo }),
                    ..state.viewport.clone()
                },
            });
        }
        assert_eq!(state.viewport.latitude, 48.13);
    }

    #[test]
    fn actions_update_selection_and_message() {
        let mut state = state();
        state.dispatch(Action::SetCurrentFeature {
            feature: GeoFeature { id: None, geometry: None, properties: Properties::new() },
            coordinates: [10.0, 53.55],
        });
        state.dispatch(Action::SetSnackbarMessage {
            message: SnackbarMessage { text: "Nothing found.".into(), kind: MessageKind::Error },
        });
        assert_eq!(state.current_feature.as_ref().unwrap().coordinates, [10.0, 53.55]);
        assert_eq!(state.snackbar.as_ref().unwrap().text, "Nothing found.");
    }

    #[test]
    fn search_phase_cycles_back_to_idle() {
        let mut state = state();
        state.begin_search();
        assert_eq!(state.search_phase, SearchPhase::Searching);
        state.finish_search(&SearchOutcome::NoMatch);
        assert_eq!(state.search_phase, SearchPhase::NoMatch);
        state.dispatch(Action::SetSnackbarMessage {
            message: SnackbarMessage { text: "Nothing found.".into(), kind: MessageKind::Error },
        });
        state.reset_search();
        assert_eq!(state.search_phase, SearchPhase::Idle);
        assert!(state.snackbar.is_none());
    }

    #[test]
    fn layer_group_sets_camera() {
        let mut state = state();
        state.select_layer_group(&LayerGroupConfig {
            title: "Balken".into(),
            layers: vec!["extrusion".into()],
            default: false,
            pitch: Some(40.0),
            bearing: Some(20.0),
        });
        assert_eq!((state.viewport.pitch, state.viewport.bearing), (40.0, 20.0));
    }
}
