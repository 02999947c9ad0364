pub mod config;
pub mod storage;
pub mod tracker;

pub use storage::HeadwayStorage;
pub use tracker::{HeadwayTracker, LookupContext, StopSeed};
