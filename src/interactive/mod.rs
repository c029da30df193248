//! Teacher/student interactive judging.
//!
//! [`InteractiveRunner`] runs on the scheduler side and starts the
//! `interactive-orchestrator` binary in a container; the [`Orchestrator`]
//! runs inside it and drives both sandboxed processes.

pub mod channel;
pub mod config;
pub mod orchestrator;
pub mod permissions;
pub mod runner;
pub mod sandbox;

pub use channel::{PipeChannel, PipeMode};
pub use config::InteractiveConfig;
pub use orchestrator::{InteractiveReport, OrchestrateRequest, Orchestrator, OrchestratorError};
pub use runner::InteractiveRunner;
