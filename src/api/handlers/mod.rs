pub mod capture;
pub mod filters;
pub mod packets;
