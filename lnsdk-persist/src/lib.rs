//! Key-version-value storage for the node SDK.
//!
//! [`kvv::KVVPersister`] adapts any [`kvv::KVVStore`] to [`lnsdk::persist::Persist`].

pub mod kvv;
