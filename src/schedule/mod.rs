pub mod engine;
pub mod models;
pub mod trigger;

pub use engine::{occurrence_code, ScheduleTriggerEngine};
pub use models::{MissionTemplate, RunStatus, ScheduleDefinition, ScheduleRunLog, TriggerType};
