//! lode: Content-Addressed Data Tracking
//!
//! Tracks large files and directories outside of version control. Each
//! directory is hashed into a Merkle tree of immutable tree objects, so a
//! change deep inside a large dataset can be committed, pushed, pulled and
//! checked out one sub-path at a time.

pub mod checkout;
pub mod cli;
pub mod commit;
pub mod config;
pub mod error;
pub mod granular;
pub mod logging;
pub mod repo;
pub mod store;
pub mod transfer;
pub mod tree;
pub mod types;
pub mod unit;
