//! herdwatch — real-time bison herd detection and tracking.
//!
//! A stream loop pulls frames from the configured video source, runs
//! tracking-mode inference, derives an aggregate movement direction, and
//! appends immutable detection records to a bounded in-memory history that
//! the HTTP layer reads concurrently.

pub mod api;
pub mod capture;
pub mod config;
pub mod detector;
pub mod logging;
pub mod movement;
pub mod processor;
pub mod records;
pub mod sample;
pub mod service;
pub mod store;
pub mod telemetry;

pub use config::{load_config, WatchConfig};
pub use movement::MovementDirection;
pub use records::{DataSource, DetectionRecord};
pub use service::DetectionService;
