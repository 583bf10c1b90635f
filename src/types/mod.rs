pub mod risk;
pub mod snapshot;
pub mod weather_data;
