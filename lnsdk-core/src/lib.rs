#![crate_name = "lnsdk"]

//! A Lightning node SDK core.
//!
//! Start with [`session::NodeSession::connect`], which returns a [`session::Session`]
//! handle for payments, swaps, LSP management and backups.

#![forbid(unsafe_code)]
#![warn(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

pub use bitcoin;
pub use lightning_invoice;

/// Various utilities
pub mod util;

/// Encrypted backup and restore
pub mod backup;
/// Transport shim for foreign runtimes
pub mod binding;
/// On-chain data source
pub mod chain;
/// Node configuration
pub mod config;
/// Error types
pub mod error;
/// Event subscriptions
pub mod events;
/// Fiat rates
pub mod fiat;
/// Input classification
pub mod input_parser;
/// BOLT-11 invoices
pub mod invoice;
/// LNURL auth, pay and withdraw
pub mod lnurl;
/// Lightning Service Providers
pub mod lsp;
/// Domain model
pub mod model;
/// Node backend interface
pub mod node_api;
/// Payment engine
pub mod payments;
/// Persistence
pub mod persist;
/// HTTP access
pub mod rest;
/// Reverse swaps (off-chain to on-chain)
pub mod reverse_swap;
/// Seed and key derivation
pub mod seed;
/// Session lifecycle
pub mod session;
/// Submarine swaps (on-chain to off-chain)
pub mod swap;

pub use std::sync::Arc;

/// Convenience re-exports
pub mod prelude {
    pub use std::collections::BTreeMap as OrderedMap;
    pub use std::sync::{Mutex, MutexGuard};

    /// Convenience trait for Send + Sync
    pub trait SendSync: Send + Sync {}
}

pub use prelude::SendSync;
