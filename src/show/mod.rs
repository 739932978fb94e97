//! Shows: editing them, resolving them into a plan and playing them back.

mod audio;
mod editor;
mod plan;
mod queue;
mod scheduler;
mod status;

pub use audio::{AudioBackend, AudioOutput, AudioPhase, AudioSync, SilentAudio};
#[cfg(feature = "audio")]
pub use audio::KiraAudio;
pub use editor::{new_id, ShowEditor};
pub use plan::{Cue, CueAction, PlanSettings, PlaybackError, ShowPlan};
pub use queue::{EventKind, EventQueue, PendingEvents};
pub use scheduler::{Scheduler, SchedulerSettings};
pub use status::{ActiveEffect, ShowStatus};
