pub mod checksum;
pub mod models;
pub mod store;

pub use models::*;
