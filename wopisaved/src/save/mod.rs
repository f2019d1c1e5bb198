pub mod attempt;
pub mod backoff;
pub mod config;
pub mod disconnect;
pub mod guard;
pub mod orchestrator;
pub mod registry;
pub mod request;
pub mod session;
pub mod storage;
pub mod tracker;

pub use attempt::{AttemptId, FinalOutcome, TriggerKind};
pub use config::SaveConfig;
pub use orchestrator::{Command, Phase, SaveOrchestrator, SaveRequest};
pub use registry::SessionRegistry;
pub use session::{SessionError, SessionHandle, SessionReport, SessionSummary, spawn_session};
pub use storage::{PersistClient, PersistError};
pub use tracker::ModificationOrigin;
