pub mod memory;
#[cfg(any(feature = "redb-kvv", test))]
pub mod redb;

use core::fmt::Debug;
use core::ops::Deref;

use lnsdk::model::{Payment, ReverseSwapInfo, SwapInfo};
use lnsdk::persist::{Error, Persist};
use lnsdk::SendSync;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{from_slice, to_vec};

const PAYMENT_PREFIX: &str = "payment";
const SWAP_PREFIX: &str = "swap";
const REVERSE_SWAP_PREFIX: &str = "reverse_swap";
const SETTING_PREFIX: &str = "setting";
const SEPARATOR: &str = "/";

/// key-version-value
pub struct KVV(pub String, pub (u64, Vec<u8>));

impl Debug for KVV {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("KVV").field(&self.0).field(&self.1 .0).field(&self.1 .1).finish()
    }
}

impl KVV {
    /// convert to the inner tuple
    pub fn into_inner(self) -> (String, (u64, Vec<u8>)) {
        (self.0, self.1)
    }
}

/// A key-version-value store.
///
/// A deleted key keeps its version, with an empty value as a tombstone.
pub trait KVVStore: SendSync {
    type Iter: Iterator<Item = KVV>;

    /// Put a value, one version above the current one
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error>;
    /// If the key already exists, the version must be greater than the existing version,
    /// or equal with an unchanged value.
    fn put_with_version(&self, key: &str, version: u64, value: Vec<u8>) -> Result<(), Error>;
    /// Atomically put several KVVs into the store
    fn put_batch(&self, kvvs: Vec<KVV>) -> Result<(), Error>;
    /// Get a key-value pair from the store
    /// Returns Ok(None) if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<(u64, Vec<u8>)>, Error>;
    /// Get the version of a key-value pair from the store
    /// Returns Ok(None) if the key does not exist.
    fn get_version(&self, key: &str) -> Result<Option<u64>, Error>;
    /// Get all key-value pairs with the given prefix, in key order
    fn get_prefix(&self, prefix: &str) -> Result<Self::Iter, Error>;
    /// Delete a key-value pair from the store
    fn delete(&self, key: &str) -> Result<(), Error>;
    /// Clear the database
    fn clear_database(&self) -> Result<(), Error>;
}

/// Adapter for a KVVStore to implement Persist.
pub struct KVVPersister<S: KVVStore>(pub S);

impl<S: KVVStore> Deref for KVVPersister<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S: KVVStore> SendSync for KVVPersister<S> {}

impl<S: KVVStore> KVVPersister<S> {
    fn next_kvv<T: Serialize>(&self, key: String, entity: &T) -> Result<KVV, Error> {
        let version = self.get_version(&key)?.map(|v| v + 1).unwrap_or(0);
        Ok(KVV(key, (version, encode(entity)?)))
    }

    fn get_entity<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.get(key)? {
            Some((_, value)) if !value.is_empty() => decode(key, &value).map(Some),
            _ => Ok(None),
        }
    }

    fn list_entities<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, Error> {
        let prefix = prefix.to_string() + SEPARATOR;
        self.get_prefix(&prefix)?
            .map(KVV::into_inner)
            .filter(|(_k, (_v, value))| !value.is_empty()) // tombstones
            .map(|(key, (_v, value))| decode(&key, &value))
            .collect()
    }
}

impl<S: KVVStore> Persist for KVVPersister<S> {
    fn insert_or_update_payments(&self, payments: &[Payment]) -> Result<(), Error> {
        if payments.is_empty() {
            return Ok(());
        }
        let kvvs = payments
            .iter()
            .map(|p| self.next_kvv(make_key(PAYMENT_PREFIX, &p.id), p))
            .collect::<Result<Vec<_>, _>>()?;
        self.put_batch(kvvs)
    }

    fn get_payment(&self, id: &str) -> Result<Option<Payment>, Error> {
        self.get_entity(&make_key(PAYMENT_PREFIX, id))
    }

    fn list_payments(&self) -> Result<Vec<Payment>, Error> {
        self.list_entities(PAYMENT_PREFIX)
    }

    fn insert_or_update_swap(&self, swap: &SwapInfo) -> Result<(), Error> {
        self.put(&make_key(SWAP_PREFIX, &swap.bitcoin_address), encode(swap)?)
    }

    fn get_swap(&self, address: &str) -> Result<Option<SwapInfo>, Error> {
        self.get_entity(&make_key(SWAP_PREFIX, address))
    }

    fn list_swaps(&self) -> Result<Vec<SwapInfo>, Error> {
        self.list_entities(SWAP_PREFIX)
    }

    fn insert_or_update_reverse_swap(&self, swap: &ReverseSwapInfo) -> Result<(), Error> {
        self.put(&make_key(REVERSE_SWAP_PREFIX, &swap.id), encode(swap)?)
    }

    fn get_reverse_swap(&self, id: &str) -> Result<Option<ReverseSwapInfo>, Error> {
        self.get_entity(&make_key(REVERSE_SWAP_PREFIX, id))
    }

    fn list_reverse_swaps(&self) -> Result<Vec<ReverseSwapInfo>, Error> {
        self.list_entities(REVERSE_SWAP_PREFIX)
    }

    fn set_setting(&self, name: &str, value: &str) -> Result<(), Error> {
        // an empty string would read back as a tombstone
        if value.is_empty() {
            return self.delete_setting(name);
        }
        self.put(&make_key(SETTING_PREFIX, name), value.as_bytes().to_vec())
    }

    fn get_setting(&self, name: &str) -> Result<Option<String>, Error> {
        match self.get(&make_key(SETTING_PREFIX, name))? {
            Some((_, value)) if !value.is_empty() => String::from_utf8(value)
                .map(Some)
                .map_err(|e| Error::Internal(format!("setting {}: {}", name, e))),
            _ => Ok(None),
        }
    }

    fn delete_setting(&self, name: &str) -> Result<(), Error> {
        let key = make_key(SETTING_PREFIX, name);
        if self.get_version(&key)?.is_none() {
            return Ok(());
        }
        self.delete(&key)
    }

    fn clear_database(&self) -> Result<(), Error> {
        // delegate to the underlying store
        self.0.clear_database()
    }
}

fn make_key(prefix: &str, id: &str) -> String {
    format!("{}{}{}", prefix, SEPARATOR, id)
}

fn encode<T: Serialize>(entity: &T) -> Result<Vec<u8>, Error> {
    to_vec(entity).map_err(|e| Error::Internal(format!("encode: {}", e)))
}

fn decode<T: DeserializeOwned>(key: &str, value: &[u8]) -> Result<T, Error> {
    from_slice(value).map_err(|e| Error::Internal(format!("decode {}: {}", key, e)))
}
