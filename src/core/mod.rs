pub mod apdu;
pub mod client;
pub mod error;
pub mod reader;
pub mod registry;
pub mod slot_config;
pub mod transport;
pub mod utils;
