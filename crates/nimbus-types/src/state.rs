use serde::{Deserialize, Serialize};

use crate::catalog::{ForecastModel, FrameQuery};

/// Selection state shared with the sidebar. Mutated only through [`Action`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    pub model: ForecastModel,
    pub variable: String,
    pub base_time: Option<i64>,
    pub valid_time: Option<i64>,
    pub loading: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    SelectModel(ForecastModel),
    SelectVariable(String),
    SelectBaseTime(i64),
    SelectValidTime(i64),
    /// Explicit load of a whole query. Always refetches; the shown set stays
    /// until the new one arrives.
    SelectQuery(FrameQuery),
    SetLoading(bool),
}

/// What the player has to do after an action was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Unchanged,
    /// Model or variable switched: the current frame set is obsolete.
    SourceChanged(Option<FrameQuery>),
    /// Same source, different base time: fetch but keep showing the old set.
    BaseTimeChanged(FrameQuery),
    SeekValidTime(i64),
    Loading(bool),
}

impl AppState {
    pub fn new(model: ForecastModel, variable: impl Into<String>) -> Self {
        Self {
            model,
            variable: variable.into(),
            base_time: None,
            valid_time: None,
            loading: false,
        }
    }

    pub fn query(&self) -> Option<FrameQuery> {
        self.base_time
            .map(|base_time| FrameQuery::new(self.model, self.variable.clone(), base_time))
    }

    pub fn apply(&mut self, action: Action) -> StateChange {
        match action {
            Action::SelectModel(model) => {
                if self.model == model {
                    return StateChange::Unchanged;
                }
                self.model = model;
                self.valid_time = None;
                StateChange::SourceChanged(self.query())
            }
            Action::SelectVariable(variable) => {
                if self.variable == variable {
                    return StateChange::Unchanged;
                }
                self.variable = variable;
                self.valid_time = None;
                StateChange::SourceChanged(self.query())
            }
            Action::SelectBaseTime(base_time) => {
                if self.base_time == Some(base_time) {
                    return StateChange::Unchanged;
                }
                self.base_time = Some(base_time);
                self.valid_time = None;
                StateChange::BaseTimeChanged(FrameQuery::new(
                    self.model,
                    self.variable.clone(),
                    base_time,
                ))
            }
            Action::SelectValidTime(valid_time) => {
                self.valid_time = Some(valid_time);
                StateChange::SeekValidTime(valid_time)
            }
            Action::SelectQuery(query) => {
                self.model = query.model;
                self.variable = query.variable.clone();
                self.base_time = Some(query.base_time);
                self.valid_time = None;
                StateChange::BaseTimeChanged(query)
            }
            Action::SetLoading(loading) => {
                if self.loading == loading {
                    return StateChange::Unchanged;
                }
                self.loading = loading;
                StateChange::Loading(loading)
            }
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ForecastModel::default(), "sea_level")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_switch_invalidates_source() {
        let mut state = AppState::default();
        assert_eq!(
            state.apply(Action::SelectModel(ForecastModel::Graphcast)),
            StateChange::SourceChanged(None)
        );
        state.apply(Action::SelectBaseTime(1_578_808_800));
        let change = state.apply(Action::SelectVariable("rain".into()));
        assert_eq!(
            change,
            StateChange::SourceChanged(Some(FrameQuery::new(
                ForecastModel::Graphcast,
                "rain",
                1_578_808_800
            )))
        );
    }

    #[test]
    fn repeated_selection_is_a_no_op() {
        let mut state = AppState::default();
        assert_eq!(
            state.apply(Action::SelectModel(ForecastModel::Cerrora)),
            StateChange::Unchanged
        );
        state.apply(Action::SelectBaseTime(10));
        assert_eq!(state.apply(Action::SelectBaseTime(10)), StateChange::Unchanged);
        assert_eq!(state.apply(Action::SetLoading(false)), StateChange::Unchanged);
    }

    #[test]
    fn valid_time_selection_requests_seek() {
        let mut state = AppState::default();
        assert_eq!(
            state.apply(Action::SelectValidTime(42)),
            StateChange::SeekValidTime(42)
        );
        assert_eq!(state.valid_time, Some(42));
    }

    #[test]
    fn query_selection_records_the_whole_source() {
        let mut state = AppState::default();
        state.apply(Action::SelectValidTime(7));
        let query = FrameQuery::new(ForecastModel::Graphcast, "rain", 100);
        assert_eq!(
            state.apply(Action::SelectQuery(query.clone())),
            StateChange::BaseTimeChanged(query.clone())
        );
        assert_eq!(state.query(), Some(query));
        assert_eq!(state.valid_time, None);

        // A later model switch now knows what to refetch.
        assert_eq!(
            state.apply(Action::SelectModel(ForecastModel::Cerrora)),
            StateChange::SourceChanged(Some(FrameQuery::new(
                ForecastModel::Cerrora,
                "rain",
                100
            )))
        );
    }
}
