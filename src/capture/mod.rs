pub mod classifier;
pub mod controller;
pub mod delivery;
pub mod drain;
pub mod inspector;
pub mod local;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod source;
pub mod worker;
