pub mod alert;
pub mod config;
pub mod error;
pub mod exchanges;
pub mod signal;
pub mod store;
pub mod utils;
pub mod workers;
