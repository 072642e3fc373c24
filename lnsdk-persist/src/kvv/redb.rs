use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use lnsdk::SendSync;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::*;

use super::{Error, KVVPersister, KVVStore, KVV};

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");
const DB_FILE: &str = "lnsdk.redb";

/// An iterator over a KVVStore range
pub struct Iter(std::vec::IntoIter<KVV>);

impl Iterator for Iter {
    type Item = KVV;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

/// A key-version-value store backed by redb
pub struct RedbKVVStore {
    db: Database,
    // current version of every key, so versioning is enforced without a read transaction
    versions: Mutex<BTreeMap<String, u64>>,
}

impl SendSync for RedbKVVStore {}

fn unavailable(e: impl Display) -> Error {
    Error::Unavailable(e.to_string())
}

impl RedbKVVStore {
    /// Open or create the store in directory `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path).map_err(unavailable)?;
        }
        if !path.is_dir() {
            return Err(Error::Unavailable(format!("{} is not a directory", path.display())));
        }
        let mut db = Database::create(path.join(DB_FILE)).map_err(unavailable)?;
        if !db.check_integrity().map_err(unavailable)? {
            warn!("repaired {}", path.display());
        }
        {
            // create the table if it doesn't exist
            let tx = db.begin_write().map_err(unavailable)?;
            tx.open_table(TABLE).map_err(unavailable)?;
            tx.commit().map_err(unavailable)?;
        }

        let mut versions = BTreeMap::new();
        {
            let tx = db.begin_read().map_err(unavailable)?;
            let table = tx.open_table(TABLE).map_err(unavailable)?;
            for item in table.iter().map_err(unavailable)? {
                let (key, vv) = item.map_err(unavailable)?;
                let (version, _) = Self::decode_vv(vv.value())?;
                versions.insert(key.value().to_string(), version);
            }
        }
        info!("opened {} with {} keys", path.display(), versions.len());
        Ok(Self { db, versions: Mutex::new(versions) })
    }

    /// Open the store in `path`, wrapped as a persister
    pub fn open_persister<P: AsRef<Path>>(path: P) -> Result<KVVPersister<Self>, Error> {
        Ok(KVVPersister(Self::new(path)?))
    }

    fn decode_vv(vv: &[u8]) -> Result<(u64, Vec<u8>), Error> {
        if vv.len() < 8 {
            return Err(Error::Internal(format!("short entry of {} bytes", vv.len())));
        }
        let (version, value) = vv.split_at(8);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(version);
        Ok((u64::from_be_bytes(buf), value.to_vec()))
    }

    fn encode_vv(version: u64, value: &[u8]) -> Vec<u8> {
        let mut vv = Vec::with_capacity(value.len() + 8);
        vv.extend_from_slice(&version.to_be_bytes());
        vv.extend_from_slice(value);
        vv
    }

    fn lock_versions(&self) -> Result<MutexGuard<'_, BTreeMap<String, u64>>, Error> {
        self.versions.lock().map_err(|_| Error::Internal("poisoned".into()))
    }

    // Whether the write is new; an equal version must carry the stored value
    fn check_version(
        &self,
        versions: &BTreeMap<String, u64>,
        key: &str,
        version: u64,
        vv: &[u8],
    ) -> Result<bool, Error> {
        match versions.get(key) {
            Some(v) if version < *v => {
                error!("version mismatch for {}: {} < {}", key, version, v);
                Err(Error::VersionMismatch)
            }
            Some(v) if version == *v => {
                let tx = self.db.begin_read().map_err(unavailable)?;
                let table = tx.open_table(TABLE).map_err(unavailable)?;
                let existing = table.get(key).map_err(unavailable)?;
                if existing.as_ref().map(|e| e.value()) != Some(vv) {
                    error!("value mismatch for {}: {}", key, version);
                    return Err(Error::VersionMismatch);
                }
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}

impl KVVStore for RedbKVVStore {
    type Iter = Iter;

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let version = self.get_version(key)?.map(|v| v + 1).unwrap_or(0);
        self.put_with_version(key, version, value)
    }

    #[instrument(skip(self, value))]
    fn put_with_version(&self, key: &str, version: u64, value: Vec<u8>) -> Result<(), Error> {
        let vv = Self::encode_vv(version, &value);
        let mut versions = self.lock_versions()?;
        if !self.check_version(&versions, key, version, &vv)? {
            return Ok(());
        }
        let tx = self.db.begin_write().map_err(unavailable)?;
        {
            let mut table = tx.open_table(TABLE).map_err(unavailable)?;
            table.insert(key, vv.as_slice()).map_err(unavailable)?;
        }
        tx.commit().map_err(unavailable)?;
        versions.insert(key.to_string(), version);
        Ok(())
    }

    #[instrument(skip(self, kvvs), fields(count = kvvs.len()))]
    fn put_batch(&self, kvvs: Vec<KVV>) -> Result<(), Error> {
        let mut versions = self.lock_versions()?;
        let mut staged = Vec::with_capacity(kvvs.len());
        for kvv in kvvs.into_iter() {
            let (key, (version, value)) = kvv.into_inner();
            let vv = Self::encode_vv(version, &value);
            if self.check_version(&versions, &key, version, &vv)? {
                staged.push((key, version, vv));
            }
        }
        let tx = self.db.begin_write().map_err(unavailable)?;
        {
            let mut table = tx.open_table(TABLE).map_err(unavailable)?;
            for (key, _, vv) in staged.iter() {
                table.insert(key.as_str(), vv.as_slice()).map_err(unavailable)?;
            }
        }
        tx.commit().map_err(unavailable)?;
        for (key, version, _) in staged.into_iter() {
            versions.insert(key, version);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn get(&self, key: &str) -> Result<Option<(u64, Vec<u8>)>, Error> {
        let tx = self.db.begin_read().map_err(unavailable)?;
        let table = tx.open_table(TABLE).map_err(unavailable)?;
        let result = table.get(key).map_err(unavailable)?;
        result.map(|vv| Self::decode_vv(vv.value())).transpose()
    }

    fn get_version(&self, key: &str) -> Result<Option<u64>, Error> {
        Ok(self.lock_versions()?.get(key).copied())
    }

    fn get_prefix(&self, prefix: &str) -> Result<Self::Iter, Error> {
        let tx = self.db.begin_read().map_err(unavailable)?;
        let table = tx.open_table(TABLE).map_err(unavailable)?;
        let mut result = Vec::new();
        for item in table.range(prefix..).map_err(unavailable)? {
            let (key, vv) = item.map_err(unavailable)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            let (version, value) = Self::decode_vv(vv.value())?;
            result.push(KVV(key.value().to_string(), (version, value)));
        }
        Ok(Iter(result.into_iter()))
    }

    fn delete(&self, key: &str) -> Result<(), Error> {
        self.put(key, Vec::new())
    }

    fn clear_database(&self) -> Result<(), Error> {
        let mut versions = self.lock_versions()?;
        let tx = self.db.begin_write().map_err(unavailable)?;
        tx.delete_table(TABLE).map_err(unavailable)?;
        tx.open_table(TABLE).map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;
        versions.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnsdk::model::PaymentType;
    use lnsdk::persist::Persist;
    use lnsdk::util::test_utils::make_test_payment;

    #[test]
    fn basic_test() -> Result<(), Error> {
        let tempdir = tempfile::tempdir().unwrap();
        let store = RedbKVVStore::new(tempdir.path())?;
        store.put("foo1", b"bar".to_vec())?;
        store.put("foo2", b"boo".to_vec())?;
        assert_eq!(store.get_version("foo1")?.unwrap(), 0);
        assert_eq!(store.get("foo1")?.unwrap().1, b"bar");
        store.put_with_version("foo1", 1, b"bar2".to_vec())?;
        store.put_with_version("foo1", 1, b"bar2".to_vec())?;
        assert_eq!(store.get_version("foo1")?.unwrap(), 1);
        assert_eq!(store.get("foo1")?.unwrap().1, b"bar2");

        // wrong version
        assert!(store.put_with_version("foo1", 0, b"bar2".to_vec()).is_err());
        assert!(store.put_with_version("foo1", 1, b"bar3".to_vec()).is_err());

        // versions survive a reopen
        drop(store);
        let store = RedbKVVStore::new(tempdir.path())?;
        assert_eq!(store.get_version("foo1")?, Some(1));
        assert_eq!(store.get("foo2")?, Some((0, b"boo".to_vec())));
        Ok(())
    }

    #[test]
    fn put_batch_test() -> Result<(), Error> {
        let tempdir = tempfile::tempdir().unwrap();
        let store = RedbKVVStore::new(tempdir.path())?;
        let kvvs = vec![
            KVV("foo1".to_string(), (0, b"bar".to_vec())),
            KVV("foo2".to_string(), (0, b"bar".to_vec())),
        ];
        store.put_batch(kvvs)?;
        let kvvs = vec![
            KVV("foo1".to_string(), (1, b"bar2".to_vec())),
            KVV("foo2".to_string(), (0, b"bar3".to_vec())),
        ];
        assert_eq!(store.put_batch(kvvs), Err(Error::VersionMismatch));
        assert_eq!(store.get("foo1")?, Some((0, b"bar".to_vec())));
        store.put_with_version("foo1", 1, b"bar3".to_vec())?;
        assert_eq!(store.get("foo1")?.unwrap().1, b"bar3");
        Ok(())
    }

    #[test]
    fn persister_test() {
        let tempdir = tempfile::tempdir().unwrap();
        let payment = make_test_payment(1, PaymentType::Received, 100);
        {
            let persister = RedbKVVStore::open_persister(tempdir.path()).unwrap();
            persister.insert_or_update_payments(&[payment.clone()]).unwrap();
            persister.set_lsp_id("lsp-1").unwrap();
        }
        let persister = RedbKVVStore::open_persister(tempdir.path()).unwrap();
        assert_eq!(persister.list_payments().unwrap(), vec![payment]);
        assert_eq!(persister.get_lsp_id().unwrap().as_deref(), Some("lsp-1"));

        Persist::clear_database(&persister).unwrap();
        assert!(persister.is_empty().unwrap());
        assert_eq!(persister.get_version("setting/lsp_id").unwrap(), None);
    }
}
