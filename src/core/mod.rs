pub mod budget;
pub mod domain;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod traits;
