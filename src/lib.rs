//! # rtelpush - Concurrent Telnet Configuration Pusher
//!
//! `rtelpush` pushes a fixed batch of configuration lines to a fleet of
//! network devices over plaintext Telnet. Every device is dialed
//! concurrently, receives the same commands terminated by CR+LF, and the run
//! reports which devices failed.
//!
//! ## Features
//!
//! - **Derived Targets**: device `n` lives at `target_ip:(base_port + n)`
//! - **Concurrent Fan-out**: one Tokio task per device, joined before reporting
//! - **Per-target Errors**: connection and transmission failures are kept apart,
//!   including how many commands reached a device before a write failed
//! - **Timeouts**: optional connect and per-command write timeouts
//! - **Run Recording**: JSONL transcript of every connection and command
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtelpush::config::PushConfig;
//! use rtelpush::dispatch::Dispatcher;
//! use rtelpush::session::TelnetConnector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PushConfig {
//!         target_ip: "10.0.0.5".to_string(),
//!         device_count: 3,
//!         ..PushConfig::default()
//!     };
//!
//!     let report = Dispatcher::new(TelnetConnector, &config)?.run().await;
//!     for failure in &report.failures {
//!         eprintln!("{}", failure.error);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`dispatch::Dispatcher`] - Fans the batch out to every target and collects results
//! - [`session::TelnetConnector`] - Opens Telnet sessions over TCP
//! - [`error::PushError`] - Error types for configuration and delivery
//! - [`config`] - Run configuration and target derivation

pub mod config;
pub mod dispatch;
pub mod error;
pub mod session;
