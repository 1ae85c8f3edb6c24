pub mod correlator;
pub mod models;

pub use correlator::{correlate, similarity};
pub use models::{MatchType, MissionStep, StepMatch, Zone};
