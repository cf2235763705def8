//! Live packet capture with ownership tagging, anomaly flagging and a
//! rate-limited delivery queue, served over a REST and WebSocket API.

pub mod api;
pub mod capture;
pub mod models;
pub mod storage;
pub mod utils;
