//! Logging and environment helpers for applications embedding the node SDK

pub mod config;
pub mod env_var;
pub mod util;

pub use env_var::*;
