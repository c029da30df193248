/// Docker module contains the implementation of the container executor
/// on top of the docker engine API.
pub mod executor;

pub use executor::DockerExecutor;
