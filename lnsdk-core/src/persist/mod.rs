use crate::model::{NodeState, Payment, ReverseSwapInfo, StateSnapshot, SwapInfo};
use crate::prelude::*;

/// Persister error
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Persister is temporarily unavailable, might work later
    Unavailable(String),
    /// Inconsistent state, needed resource is missing
    NotFound(String),
    /// Inconsistent state, resource already present
    AlreadyExists(String),
    /// A versioned put went backwards, or changed a value without bumping the version
    VersionMismatch,
    /// Non-recoverable internal error
    Internal(String),
}

/// Setting names
pub mod settings {
    /// Sync cursor, seconds since the UNIX epoch
    pub const LAST_SYNC_TIME: &str = "last_sync_time";
    /// Selected LSP
    pub const LSP_ID: &str = "lsp_id";
    /// Remote backup version
    pub const BACKUP_VERSION: &str = "backup_version";
    /// Backup status, JSON
    pub const BACKUP_STATUS: &str = "backup_status";
    /// Last known node state, JSON
    pub const NODE_STATE: &str = "node_state";
}

/// Persister of payments, swaps and session settings
///
/// Implementations must be safe to call from concurrent readers and a single writer, and
/// return each entity whole.
pub trait Persist: SendSync {
    /// Insert or replace payments by id
    fn insert_or_update_payments(&self, payments: &[Payment]) -> Result<(), Error>;
    /// Get a payment by hash
    fn get_payment(&self, id: &str) -> Result<Option<Payment>, Error>;
    /// All payments, in no particular order
    fn list_payments(&self) -> Result<Vec<Payment>, Error>;

    /// Insert or replace a swap by deposit address
    fn insert_or_update_swap(&self, swap: &SwapInfo) -> Result<(), Error>;
    /// Get a swap by deposit address
    fn get_swap(&self, address: &str) -> Result<Option<SwapInfo>, Error>;
    /// All swaps
    fn list_swaps(&self) -> Result<Vec<SwapInfo>, Error>;

    /// Insert or replace a reverse swap by id
    fn insert_or_update_reverse_swap(&self, swap: &ReverseSwapInfo) -> Result<(), Error>;
    /// Get a reverse swap by id
    fn get_reverse_swap(&self, id: &str) -> Result<Option<ReverseSwapInfo>, Error>;
    /// All reverse swaps
    fn list_reverse_swaps(&self) -> Result<Vec<ReverseSwapInfo>, Error>;

    /// Store a setting
    fn set_setting(&self, name: &str, value: &str) -> Result<(), Error>;
    /// Read a setting
    fn get_setting(&self, name: &str) -> Result<Option<String>, Error>;
    /// Remove a setting
    fn delete_setting(&self, name: &str) -> Result<(), Error>;

    /// Clear the database
    fn clear_database(&self) -> Result<(), Error>;

    /// Cached node state
    fn get_node_state(&self) -> Result<Option<NodeState>, Error> {
        self.get_setting(settings::NODE_STATE)?
            .map(|s| serde_json::from_str(&s).map_err(|e| Error::Internal(e.to_string())))
            .transpose()
    }

    /// Cache node state
    fn set_node_state(&self, state: &NodeState) -> Result<(), Error> {
        let s = serde_json::to_string(state).map_err(|e| Error::Internal(e.to_string()))?;
        self.set_setting(settings::NODE_STATE, &s)
    }

    /// Selected LSP
    fn get_lsp_id(&self) -> Result<Option<String>, Error> {
        self.get_setting(settings::LSP_ID)
    }

    /// Select an LSP
    fn set_lsp_id(&self, id: &str) -> Result<(), Error> {
        self.set_setting(settings::LSP_ID, id)
    }

    /// Numeric setting
    fn get_u64_setting(&self, name: &str) -> Result<Option<u64>, Error> {
        self.get_setting(name)?
            .map(|s| s.parse::<u64>().map_err(|e| Error::Internal(format!("{}: {}", name, e))))
            .transpose()
    }

    /// Whether nothing was ever stored
    fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.get_node_state()?.is_none()
            && self.list_payments()?.is_empty()
            && self.list_swaps()?.is_empty()
            && self.list_reverse_swaps()?.is_empty())
    }

    /// Export everything backed up, except node channel state
    fn export_snapshot(&self) -> Result<StateSnapshot, Error> {
        Ok(StateSnapshot {
            payments: self.list_payments()?,
            swaps: self.list_swaps()?,
            reverse_swaps: self.list_reverse_swaps()?,
            lsp_id: self.get_lsp_id()?,
            node_state: self.get_node_state()?,
            channel_state: Vec::new(),
        })
    }

    /// Import a snapshot over the current contents
    fn import_snapshot(&self, snapshot: &StateSnapshot) -> Result<(), Error> {
        self.insert_or_update_payments(&snapshot.payments)?;
        for swap in snapshot.swaps.iter() {
            self.insert_or_update_swap(swap)?;
        }
        for swap in snapshot.reverse_swaps.iter() {
            self.insert_or_update_reverse_swap(swap)?;
        }
        if let Some(lsp_id) = snapshot.lsp_id.as_ref() {
            self.set_lsp_id(lsp_id)?;
        }
        if let Some(state) = snapshot.node_state.as_ref() {
            self.set_node_state(state)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    payments: OrderedMap<String, Payment>,
    swaps: OrderedMap<String, SwapInfo>,
    reverse_swaps: OrderedMap<String, ReverseSwapInfo>,
    settings: OrderedMap<String, String>,
}

/// An in-memory persister
#[derive(Default)]
pub struct MemoryPersister {
    state: Mutex<MemoryState>,
}

impl MemoryPersister {
    /// Create an empty persister
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, Error> {
        self.state.lock().map_err(|_| Error::Internal("poisoned".into()))
    }
}

impl SendSync for MemoryPersister {}

impl Persist for MemoryPersister {
    fn insert_or_update_payments(&self, payments: &[Payment]) -> Result<(), Error> {
        let mut state = self.lock()?;
        for p in payments {
            state.payments.insert(p.id.clone(), p.clone());
        }
        Ok(())
    }

    fn get_payment(&self, id: &str) -> Result<Option<Payment>, Error> {
        Ok(self.lock()?.payments.get(id).cloned())
    }

    fn list_payments(&self) -> Result<Vec<Payment>, Error> {
        Ok(self.lock()?.payments.values().cloned().collect())
    }

    fn insert_or_update_swap(&self, swap: &SwapInfo) -> Result<(), Error> {
        self.lock()?.swaps.insert(swap.bitcoin_address.clone(), swap.clone());
        Ok(())
    }

    fn get_swap(&self, address: &str) -> Result<Option<SwapInfo>, Error> {
        Ok(self.lock()?.swaps.get(address).cloned())
    }

    fn list_swaps(&self) -> Result<Vec<SwapInfo>, Error> {
        Ok(self.lock()?.swaps.values().cloned().collect())
    }

    fn insert_or_update_reverse_swap(&self, swap: &ReverseSwapInfo) -> Result<(), Error> {
        self.lock()?.reverse_swaps.insert(swap.id.clone(), swap.clone());
        Ok(())
    }

    fn get_reverse_swap(&self, id: &str) -> Result<Option<ReverseSwapInfo>, Error> {
        Ok(self.lock()?.reverse_swaps.get(id).cloned())
    }

    fn list_reverse_swaps(&self) -> Result<Vec<ReverseSwapInfo>, Error> {
        Ok(self.lock()?.reverse_swaps.values().cloned().collect())
    }

    fn set_setting(&self, name: &str, value: &str) -> Result<(), Error> {
        self.lock()?.settings.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn get_setting(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self.lock()?.settings.get(name).cloned())
    }

    fn delete_setting(&self, name: &str) -> Result<(), Error> {
        self.lock()?.settings.remove(name);
        Ok(())
    }

    fn clear_database(&self) -> Result<(), Error> {
        *self.lock()? = MemoryState::default();
        Ok(())
    }
}
