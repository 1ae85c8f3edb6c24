use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionType {
    #[default]
    NodePoint,
    Area,
}

/// How the robot leaves a step once its actions are done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassStrategy {
    #[default]
    Auto,
    /// The robot stops and waits for an operator to resume it.
    Manual,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StepActions {
    pub pick_up: bool,
    pub put_down: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionStep {
    pub position: String,
    #[serde(default)]
    pub position_type: PositionType,
    #[serde(default)]
    pub actions: StepActions,
    #[serde(default)]
    pub pass_strategy: PassStrategy,
    #[serde(default)]
    pub wait_seconds: u32,
}

impl MissionStep {
    pub fn node(position: impl Into<String>) -> Self {
        Self {
            position: position.into(),
            position_type: PositionType::NodePoint,
            actions: StepActions::default(),
            pass_strategy: PassStrategy::Auto,
            wait_seconds: 0,
        }
    }

    pub fn area(position: impl Into<String>) -> Self {
        Self {
            position_type: PositionType::Area,
            ..Self::node(position)
        }
    }

    pub fn is_manual_waypoint(&self) -> bool {
        self.pass_strategy == PassStrategy::Manual
    }
}

/// Entry of the zone table. Nodes inside a zone carry the zone code as prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Zone {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Area,
    Fuzzy,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMatch {
    pub current_step_index: Option<usize>,
    pub match_type: MatchType,
    pub confidence: Option<f64>,
    pub is_in_area: bool,
    pub completed_steps: Vec<usize>,
    pub progress_percentage: f64,
}

impl StepMatch {
    pub fn unmatched() -> Self {
        Self {
            current_step_index: None,
            match_type: MatchType::None,
            confidence: None,
            is_in_area: false,
            completed_steps: Vec::new(),
            progress_percentage: 0.0,
        }
    }
}
