pub mod config;
pub mod interface;
pub mod record;
pub mod session;
pub mod stats;
