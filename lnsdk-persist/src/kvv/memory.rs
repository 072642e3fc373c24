use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use lnsdk::SendSync;
use log::*;

use crate::kvv::{Error, KVVPersister, KVVStore, KVV};

type Data = BTreeMap<String, (u64, Vec<u8>)>;

/// A key-version-value in-memory store.
#[derive(Default)]
pub struct MemoryKVVStore {
    data: Mutex<Data>,
}

/// An iterator over a KVVStore range
pub struct Iter(std::vec::IntoIter<KVV>);

impl Iterator for Iter {
    type Item = KVV;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

impl MemoryKVVStore {
    /// Create a new MemoryKVVStore
    pub fn new() -> KVVPersister<Self> {
        KVVPersister(Self::default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Data>, Error> {
        self.data.lock().map_err(|_| Error::Internal("poisoned".into()))
    }
}

// Versions cannot go backwards, and a repeated version must carry the same value
fn check_version(data: &Data, key: &str, version: u64, value: &[u8]) -> Result<bool, Error> {
    match data.get(key) {
        Some((ver, _)) if version < *ver => {
            error!("version mismatch for {}: {} < {}", key, version, ver);
            Err(Error::VersionMismatch)
        }
        Some((ver, val)) if version == *ver => {
            if val.as_slice() != value {
                error!("value mismatch for {}: {}", key, version);
                return Err(Error::VersionMismatch);
            }
            Ok(false)
        }
        _ => Ok(true),
    }
}

impl SendSync for MemoryKVVStore {}

impl KVVStore for MemoryKVVStore {
    type Iter = Iter;

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let mut data = self.lock()?;
        let version = data.get(key).map(|(v, _)| v + 1).unwrap_or(0);
        data.insert(key.to_string(), (version, value));
        Ok(())
    }

    fn put_with_version(&self, key: &str, version: u64, value: Vec<u8>) -> Result<(), Error> {
        let mut data = self.lock()?;
        if check_version(&data, key, version, &value)? {
            data.insert(key.to_string(), (version, value));
        }
        Ok(())
    }

    fn put_batch(&self, kvvs: Vec<KVV>) -> Result<(), Error> {
        let mut data = self.lock()?;
        for kvv in kvvs.iter() {
            let (version, value) = &kvv.1;
            check_version(&data, &kvv.0, *version, value)?;
        }
        for kvv in kvvs.into_iter() {
            let (key, vv) = kvv.into_inner();
            data.insert(key, vv);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<(u64, Vec<u8>)>, Error> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn get_version(&self, key: &str) -> Result<Option<u64>, Error> {
        Ok(self.lock()?.get(key).map(|(v, _)| *v))
    }

    fn get_prefix(&self, prefix: &str) -> Result<Self::Iter, Error> {
        let data = self.lock()?;
        let result = data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (ver, value))| KVV(k.clone(), (*ver, value.clone())))
            .collect::<Vec<_>>();
        Ok(Iter(result.into_iter()))
    }

    fn delete(&self, key: &str) -> Result<(), Error> {
        self.put(key, Vec::new())
    }

    fn clear_database(&self) -> Result<(), Error> {
        self.lock()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_test() -> Result<(), Error> {
        let store = MemoryKVVStore::default();
        store.put("foo1", b"bar".to_vec())?;
        store.put("foo2", b"boo".to_vec())?;
        assert_eq!(store.get_version("foo1")?, Some(0));
        store.put_with_version("foo1", 1, b"bar2".to_vec())?;
        // same version, same value
        store.put_with_version("foo1", 1, b"bar2".to_vec())?;
        assert_eq!(store.get("foo1")?, Some((1, b"bar2".to_vec())));

        assert_eq!(store.put_with_version("foo1", 0, b"bar3".to_vec()), Err(Error::VersionMismatch));
        assert_eq!(store.put_with_version("foo1", 1, b"bar3".to_vec()), Err(Error::VersionMismatch));

        store.delete("foo2")?;
        assert_eq!(store.get("foo2")?, Some((1, vec![])));
        Ok(())
    }

    #[test]
    fn put_batch_test() -> Result<(), Error> {
        let store = MemoryKVVStore::default();
        store.put_batch(vec![
            KVV("foo1".to_string(), (0, b"bar".to_vec())),
            KVV("foo2".to_string(), (0, b"bar".to_vec())),
        ])?;
        let res = store.put_batch(vec![
            KVV("foo1".to_string(), (1, b"bar2".to_vec())),
            KVV("foo2".to_string(), (0, b"bar3".to_vec())),
        ]);
        assert_eq!(res, Err(Error::VersionMismatch));
        // nothing from the failed batch landed
        assert_eq!(store.get("foo1")?, Some((0, b"bar".to_vec())));
        Ok(())
    }

    #[test]
    fn prefix_test() -> Result<(), Error> {
        let store = MemoryKVVStore::default();
        for key in ["a/1", "a/2", "ab/1", "b/1"] {
            store.put(key, key.as_bytes().to_vec())?;
        }
        let keys: Vec<String> = store.get_prefix("a/")?.map(|kvv| kvv.0).collect();
        assert_eq!(keys, vec!["a/1", "a/2"]);
        store.clear_database()?;
        assert_eq!(store.get_prefix("")?.count(), 0);
        Ok(())
    }
}
