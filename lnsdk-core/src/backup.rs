use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use log::{debug, info, warn};

use crate::error::{SdkError, SdkResult};
use crate::events::SdkEvent;
use crate::model::{BackupState, BackupStatus, StateSnapshot};
use crate::persist::settings;
use crate::session::Session;
use crate::util::crypto_utils::random_bytes;
use crate::SendSync;

/// Format version of encrypted backups
pub const BACKUP_FORMAT_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// Remote store of the encrypted backup.
///
/// The store keeps a single blob with a version that increases on every push.
#[async_trait]
pub trait BackupTransport: SendSync {
    /// The current version and blob, if any
    async fn pull(&self) -> SdkResult<Option<(u64, Vec<u8>)>>;
    /// Replace the blob if the remote is still at `expected_version`, returning the new version
    async fn push(&self, expected_version: Option<u64>, data: Vec<u8>) -> SdkResult<u64>;
}

/// Encrypt a backup for `node_id`
pub fn encrypt_backup(key: &[u8; 32], node_id: &str, plaintext: &[u8]) -> SdkResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SdkError::BackupFailed(format!("cipher: {}", e)))?;
    let nonce = random_bytes::<NONCE_LEN>();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: node_id.as_bytes() })
        .map_err(|e| SdkError::BackupFailed(format!("encrypt: {}", e)))?;
    let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    blob.push(BACKUP_FORMAT_VERSION);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a backup made by [`encrypt_backup`] for the same node
pub fn decrypt_backup(key: &[u8; 32], node_id: &str, blob: &[u8]) -> SdkResult<Vec<u8>> {
    if blob.len() < 1 + NONCE_LEN {
        return Err(SdkError::BackupFailed("backup too short".into()));
    }
    if blob[0] != BACKUP_FORMAT_VERSION {
        return Err(SdkError::BackupFailed(format!("unknown backup version {}", blob[0])));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SdkError::BackupFailed(format!("cipher: {}", e)))?;
    let (nonce, ciphertext) = blob[1..].split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: node_id.as_bytes() })
        .map_err(|_| SdkError::BackupFailed("backup does not decrypt with this seed".into()))
}

/// [`BackupTransport`] over a directory, e.g. one synced by a cloud drive
pub struct FileBackupTransport {
    dir: PathBuf,
}

const BACKUP_FILE: &str = "backup.bin";

impl FileBackupTransport {
    /// Store the backup under `dir`
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        FileBackupTransport { dir: dir.into() }
    }

    fn read(&self) -> SdkResult<Option<(u64, Vec<u8>)>> {
        let path = self.dir.join(BACKUP_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SdkError::BackupFailed(format!("{}: {}", path.display(), e))),
        };
        if bytes.len() < 8 {
            return Err(SdkError::BackupFailed(format!("{} is truncated", path.display())));
        }
        let (version, data) = bytes.split_at(8);
        let mut version_bytes = [0u8; 8];
        version_bytes.copy_from_slice(version);
        Ok(Some((u64::from_be_bytes(version_bytes), data.to_vec())))
    }
}

impl SendSync for FileBackupTransport {}

#[async_trait]
impl BackupTransport for FileBackupTransport {
    async fn pull(&self) -> SdkResult<Option<(u64, Vec<u8>)>> {
        self.read()
    }

    async fn push(&self, expected_version: Option<u64>, data: Vec<u8>) -> SdkResult<u64> {
        let current = self.read()?.map(|(version, _)| version);
        if current != expected_version {
            return Err(SdkError::BackupFailed(format!(
                "remote backup at version {:?}, expected {:?}",
                current, expected_version
            )));
        }
        let version = current.unwrap_or(0) + 1;
        fs::create_dir_all(&self.dir)
            .map_err(|e| SdkError::BackupFailed(format!("{}: {}", self.dir.display(), e)))?;
        let mut bytes = version.to_be_bytes().to_vec();
        bytes.extend_from_slice(&data);
        let tmp = self.dir.join(format!("{}.tmp", BACKUP_FILE));
        fs::write(&tmp, &bytes)
            .and_then(|_| fs::rename(&tmp, self.dir.join(BACKUP_FILE)))
            .map_err(|e| SdkError::BackupFailed(format!("{}: {}", tmp.display(), e)))?;
        Ok(version)
    }
}

impl Session {
    /// Upload an encrypted snapshot of local state
    pub async fn backup(&self) -> SdkResult<()> {
        let _guard = self.lock_op().await?;
        self.backup_locked().await
    }

    /// Current backup status
    pub fn backup_status(&self) -> SdkResult<BackupStatus> {
        self.ensure_connected()?;
        self.read_backup_status()
    }

    fn read_backup_status(&self) -> SdkResult<BackupStatus> {
        match self.services.persister.get_setting(settings::BACKUP_STATUS)? {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Ok(BackupStatus::default()),
        }
    }

    fn write_backup_status(&self, status: &BackupStatus) -> SdkResult<()> {
        let s = serde_json::to_string(status)?;
        Ok(self.services.persister.set_setting(settings::BACKUP_STATUS, &s)?)
    }

    pub(crate) fn backup_needed(&self) -> bool {
        match self.read_backup_status() {
            Ok(status) => status.state != BackupState::Synced,
            Err(_) => true,
        }
    }

    /// Note that local state changed since the last backup
    pub(crate) fn mark_backup_pending(&self) {
        let result = self.read_backup_status().and_then(|mut status| {
            if status.state == BackupState::Synced {
                status.state = BackupState::Pending;
                self.write_backup_status(&status)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!("updating backup status failed: {}", e);
        }
    }

    pub(crate) async fn backup_locked(&self) -> SdkResult<()> {
        let mut status = self.read_backup_status()?;
        status.state = BackupState::InProgress;
        self.write_backup_status(&status)?;
        self.events.emit(SdkEvent::BackupStarted);

        match self.upload_snapshot().await {
            Ok(version) => {
                status.state = BackupState::Synced;
                status.last_backup_time = Some(self.services.clock.now_secs());
                status.last_error = None;
                self.write_backup_status(&status)?;
                self.events.emit(SdkEvent::BackupSucceeded);
                info!("backup version {} uploaded", version);
                Ok(())
            }
            Err(e) => {
                let reason = match e {
                    SdkError::BackupFailed(reason) => reason,
                    other => other.to_string(),
                };
                status.state = BackupState::Failed;
                status.last_error = Some(reason.clone());
                self.write_backup_status(&status)?;
                self.events.emit(SdkEvent::BackupFailed { error: reason.clone() });
                warn!("backup failed: {}", reason);
                Err(SdkError::BackupFailed(reason))
            }
        }
    }

    async fn upload_snapshot(&self) -> SdkResult<u64> {
        let persister = &self.services.persister;
        let mut snapshot = persister.export_snapshot()?;
        snapshot.channel_state = self
            .net("channel state backup", self.services.node_api.channel_state_backup())
            .await?;
        let plaintext = serde_json::to_vec(&snapshot)?;
        let blob = encrypt_backup(&self.keys.backup_key(), self.node_id(), &plaintext)?;
        let expected = persister.get_u64_setting(settings::BACKUP_VERSION)?;
        let version = self
            .net("backup upload", self.services.backup_transport.push(expected, blob))
            .await?;
        persister.set_setting(settings::BACKUP_VERSION, &version.to_string())?;
        Ok(version)
    }

    /// Restore local state from the remote backup, if there is one
    pub(crate) async fn restore_from_backup(&self) -> SdkResult<bool> {
        let (version, blob) =
            match self.net("backup download", self.services.backup_transport.pull()).await? {
                Some(found) => found,
                None => return Ok(false),
            };
        let plaintext = decrypt_backup(&self.keys.backup_key(), self.node_id(), &blob)?;
        let snapshot: StateSnapshot = serde_json::from_slice(&plaintext)?;
        if !snapshot.channel_state.is_empty() {
            self.net(
                "channel state restore",
                self.services.node_api.restore_channel_state(snapshot.channel_state.clone()),
            )
            .await?;
        }
        let persister = &self.services.persister;
        persister.import_snapshot(&snapshot)?;
        persister.set_setting(settings::BACKUP_VERSION, &version.to_string())?;
        self.write_backup_status(&BackupStatus {
            state: BackupState::Synced,
            last_backup_time: None,
            last_error: None,
        })?;
        debug!("restored {} payments from backup version {}", snapshot.payments.len(), version);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::PaymentType;
    use crate::session::NodeSession;
    use crate::util::test_utils::*;
    use crate::Arc;
    use tokio_stream::StreamExt;

    #[test]
    fn encryption_test() {
        let key = [7u8; 32];
        let blob = encrypt_backup(&key, "node", b"state").unwrap();
        assert_eq!(blob[0], BACKUP_FORMAT_VERSION);
        assert_eq!(decrypt_backup(&key, "node", &blob).unwrap(), b"state");
        assert!(decrypt_backup(&[8u8; 32], "node", &blob).is_err());
        assert!(decrypt_backup(&key, "other", &blob).is_err());
        let mut tampered = blob.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 1;
        assert!(decrypt_backup(&key, "node", &tampered).is_err());
        assert!(decrypt_backup(&key, "node", &blob[..5]).is_err());
    }

    #[tokio::test]
    async fn file_transport_test() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileBackupTransport::new(dir.path().join("backups"));
        assert_eq!(transport.pull().await.unwrap(), None);
        assert_eq!(transport.push(None, vec![1, 2]).await.unwrap(), 1);
        assert_eq!(transport.push(Some(1), vec![3]).await.unwrap(), 2);
        assert_eq!(transport.pull().await.unwrap(), Some((2, vec![3])));
        let err = transport.push(Some(1), vec![4]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackupFailed);
    }

    #[tokio::test]
    async fn backup_and_restore_test() {
        let env = TestEnv::new();
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        assert_eq!(session.backup_status().unwrap().state, BackupState::Pending);
        let payment = make_test_payment(1, PaymentType::Received, 100);
        env.node.add_payment(payment.clone());
        session.sync().await.unwrap();
        session.backup().await.unwrap();
        let status = session.backup_status().unwrap();
        assert_eq!(status.state, BackupState::Synced);
        assert!(status.last_backup_time.is_some());
        node_session.disconnect().await.unwrap();

        // a new device with the same seed
        let fresh = TestEnv::new();
        let mut services = fresh.services();
        services.backup_transport = Arc::clone(&env.backup) as Arc<dyn BackupTransport>;
        let session = node_session.connect(fresh.config(), fresh.seed(), services).await.unwrap();
        assert_eq!(session.payment_by_hash(&payment.id).unwrap(), Some(payment));
        assert!(fresh.node.restored_channel_state().is_some());
    }

    #[tokio::test]
    async fn backup_failure_keeps_session_test() {
        let env = TestEnv::new();
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let mut events = session.subscribe_events();
        env.backup.set_fail(true);
        let err = session.backup().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackupFailed);
        let status = session.backup_status().unwrap();
        assert_eq!(status.state, BackupState::Failed);
        assert!(status.last_error.is_some());
        assert!(session.is_connected());
        assert_eq!(events.next().await, Some(SdkEvent::BackupStarted));
        assert!(matches!(events.next().await, Some(SdkEvent::BackupFailed { .. })));

        env.backup.set_fail(false);
        session.backup().await.unwrap();
        assert_eq!(session.backup_status().unwrap().state, BackupState::Synced);
    }

    #[tokio::test]
    async fn foreign_backup_fails_connect_test() {
        let env = TestEnv::new();
        env.backup.put(1, vec![BACKUP_FORMAT_VERSION; 40]);
        let node_session = NodeSession::new();
        let err = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectError);
    }
}
