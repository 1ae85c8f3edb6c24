pub mod coordinator;
pub mod models;

pub use coordinator::ManualWaypointCoordinator;
pub use models::{ResumeOutcome, WaypointState, WaypointVisit};
