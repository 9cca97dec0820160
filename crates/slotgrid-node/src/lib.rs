//! # slotgrid-node: persistent storage and configuration.
//!
//! Hosts the pieces the engine needs to run against disk:
//! - [`storage::RocksLedger`]: ledger state backed by RocksDB
//! - [`config::NodeConfig`]: layered node configuration

pub mod config;
pub mod storage;

pub use config::{LogFormat, NodeConfig};
pub use storage::RocksLedger;
