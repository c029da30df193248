pub mod collaborators;
pub mod executor;
