pub mod drivers;
pub mod fullbus;
pub mod headway;
pub mod mileage;
pub mod route;
pub mod stop;
pub mod vehicle;
