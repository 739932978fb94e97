use serde::Serialize;

/// Snapshot of the scheduler for displays and the CLI
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ShowStatus {
    pub is_running: bool,
    pub current_time_ms: u64,
    pub total_duration_ms: u64,
    pub active_effects: Vec<ActiveEffect>,
}

/// A lighting effect started by the show and not stopped yet
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ActiveEffect {
    pub sequence_id: String,
    pub controller_id: String,
    pub name: String,
    pub until_ms: u64,
}
