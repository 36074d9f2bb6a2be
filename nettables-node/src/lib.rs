//! # nettables-node
//!
//! Networking for nettables.
//!
//! This crate provides:
//! - Peer connections with reader, writer and watchdog tasks
//! - The acknowledgement ledger behind Confirmation/Denial handling
//! - Server accept loop and client connect in one registry
//! - YAML + environment configuration

pub mod config;
pub mod connection;
pub mod error;
pub mod ledger;
pub mod registry;
pub mod watchdog;

pub use config::{ConfigError, NetworkConfig, NodeConfig, NodeRole, TimingConfig};
pub use connection::Connection;
pub use error::NodeError;
pub use ledger::{Acknowledged, Ledger};
pub use registry::ConnectionRegistry;
pub use watchdog::Watchdog;
