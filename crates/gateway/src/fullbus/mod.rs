pub mod storage;
pub mod tracker;

pub use storage::FullBusStorage;
pub use tracker::FullBusTracker;
