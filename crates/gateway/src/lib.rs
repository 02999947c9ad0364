pub mod api_log;
pub mod auth;
pub mod cache;
pub mod config;
pub mod core;
pub mod drivers;
pub mod fullbus;
pub mod fusion;
pub mod headway;
pub mod http;
pub mod mileage;
pub mod persist;
pub mod pollers;
pub mod sse;
pub mod state;
pub mod vehicle_log;
