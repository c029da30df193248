pub mod backend;
pub mod config;
pub mod core;
pub mod docker;
pub mod error;
pub mod interactive;
pub mod storage;
pub mod stubs;

pub use crate::core::scheduler::{Collaborators, Scheduler, SchedulerStatus};

/// Routes panics to the tracing subscriber.
pub fn set_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
