//! Stand-ins for the external services, used when no real integration is wired.
pub mod analysis;
pub mod assets;
pub mod network;

pub use analysis::SkipAnalysis;
pub use assets::LocalAssetStore;
pub use network::IsolatedNetwork;
