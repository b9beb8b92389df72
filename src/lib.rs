pub mod camera;
pub mod config;
pub mod error;
pub mod latency;
pub mod pose;
pub mod protocol;
pub mod render;
pub mod rom;
pub mod scheduler;
pub mod session;
pub mod telemetry;
pub mod transport;
