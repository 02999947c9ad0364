pub mod blocks;
pub mod capacities;
pub mod estimates;
pub mod routes;
pub mod stops;
pub mod vehicles;

pub use blocks::{BlockGroup, BlockTrips, ScheduleVehicleCalendarEntry, Trip};
pub use capacities::VehicleCapacityRecord;
pub use estimates::VehicleEstimates;
pub use routes::{RouteCatalogEntry, RouteStop, RouteWithShape};
pub use stops::TranslocStop;
pub use vehicles::VehiclePoint;
