use core::future::Future;
use core::mem;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::MutexGuard as AsyncMutexGuard;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::backup::BackupTransport;
use crate::chain::ChainService;
use crate::config::NodeConfig;
use crate::error::{SdkError, SdkResult};
use crate::events::{EventBus, EventStream, SdkEvent};
use crate::fiat::FiatAPI;
use crate::lsp::LspAPI;
use crate::model::{
    FiatCurrency, LspInformation, NodeState, Payment, PaymentStatus, PaymentType, Rate,
    RecommendedFees, ReverseSwapPairInfo,
};
use crate::node_api::NodeAPI;
use crate::persist::{settings, Persist};
use crate::prelude::*;
use crate::rest::RestClient;
use crate::reverse_swap::ReverseSwapperAPI;
use crate::seed::{KeyMaterial, Seed};
use crate::swap::SwapperAPI;
use crate::util::clock::Clock;
use crate::util::with_timeout;
use crate::Arc;

/// External collaborators of a session
#[derive(Clone)]
pub struct SessionServices {
    /// Node backend
    pub node_api: Arc<dyn NodeAPI>,
    /// LSP service
    pub lsp_api: Arc<dyn LspAPI>,
    /// Submarine swap service
    pub swapper_api: Arc<dyn SwapperAPI>,
    /// Reverse swap service
    pub reverse_swapper_api: Arc<dyn ReverseSwapperAPI>,
    /// On-chain data
    pub chain_service: Arc<dyn ChainService>,
    /// Fiat prices
    pub fiat_api: Arc<dyn FiatAPI>,
    /// Backup storage
    pub backup_transport: Arc<dyn BackupTransport>,
    /// HTTP client for LNURL
    pub rest_client: Arc<dyn RestClient>,
    /// Local storage
    pub persister: Arc<dyn Persist>,
    /// Clock
    pub clock: Arc<dyn Clock>,
}

/// Lifecycle state of the session slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No session
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// A live session exists
    Connected,
}

enum SessionSlot {
    Disconnected,
    Connecting,
    Connected(Arc<Session>),
}

/// Owns at most one connected [`Session`].
///
/// Create one per embedding and thread it through; there is no process-wide state.
pub struct NodeSession {
    slot: AsyncMutex<SessionSlot>,
}

impl Default for NodeSession {
    fn default() -> Self {
        NodeSession { slot: AsyncMutex::new(SessionSlot::Disconnected) }
    }
}

impl NodeSession {
    /// Create a disconnected slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        match *self.slot.lock().await {
            SessionSlot::Disconnected => SessionState::Disconnected,
            SessionSlot::Connecting => SessionState::Connecting,
            SessionSlot::Connected(_) => SessionState::Connected,
        }
    }

    /// Connect a session.
    ///
    /// Fails with [`SdkError::AlreadyConnected`] if a session exists or is connecting.
    /// On handshake failure the slot returns to disconnected.
    pub async fn connect(
        &self,
        config: NodeConfig,
        seed: Seed,
        services: SessionServices,
    ) -> SdkResult<Arc<Session>> {
        {
            let mut slot = self.slot.lock().await;
            match *slot {
                SessionSlot::Disconnected => *slot = SessionSlot::Connecting,
                _ => return Err(SdkError::AlreadyConnected),
            }
        }
        info!("ENTER connect network={} env={:?}", config.network, config.environment);
        let result = Session::start(config, seed, services).await;
        let mut slot = self.slot.lock().await;
        match result {
            Ok(session) => {
                *slot = SessionSlot::Connected(Arc::clone(&session));
                info!("REPLY connect node_id={}", session.node_id());
                Ok(session)
            }
            Err(e) => {
                *slot = SessionSlot::Disconnected;
                error!("connect failed: {}", e);
                Err(e)
            }
        }
    }

    /// The connected session
    pub async fn session(&self) -> SdkResult<Arc<Session>> {
        match &*self.slot.lock().await {
            SessionSlot::Connected(session) => Ok(Arc::clone(session)),
            _ => Err(SdkError::NotConnected),
        }
    }

    /// Disconnect, releasing all session resources
    pub async fn disconnect(&self) -> SdkResult<()> {
        let session = {
            let mut slot = self.slot.lock().await;
            match mem::replace(&mut *slot, SessionSlot::Disconnected) {
                SessionSlot::Connected(session) => session,
                other => {
                    *slot = other;
                    return Err(SdkError::NotConnected);
                }
            }
        };
        session.shutdown().await;
        Ok(())
    }
}

/// A connected node session
pub struct Session {
    pub(crate) config: NodeConfig,
    pub(crate) keys: KeyMaterial,
    pub(crate) services: SessionServices,
    node_id: String,
    connected: AtomicBool,
    op_lock: Arc<AsyncMutex<()>>,
    pub(crate) events: Arc<EventBus<SdkEvent>>,
    pub(crate) lsp_cache: Mutex<Option<Vec<LspInformation>>>,
    pub(crate) fee_quote: Mutex<Option<(Duration, ReverseSwapPairInfo)>>,
    shutdown_trigger: triggered::Trigger,
    shutdown_listener: triggered::Listener,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session").field("node_id", &self.node_id).finish_non_exhaustive()
    }
}

impl Session {
    async fn start(config: NodeConfig, seed: Seed, services: SessionServices) -> SdkResult<Arc<Self>> {
        let keys = KeyMaterial::new(seed, config.network);
        let expected_node_id = keys.node_id()?.to_string();
        let node_api = Arc::clone(&services.node_api);
        let node_id = with_timeout(config.network_timeout(), "node handshake", node_api.start())
            .await
            .map_err(|e| SdkError::ConnectError(e.to_string()))?;
        if node_id != expected_node_id {
            let _ = node_api.stop().await;
            return Err(SdkError::ConnectError(format!(
                "backend node {} does not match seed node {}",
                node_id, expected_node_id
            )));
        }

        let (shutdown_trigger, shutdown_listener) = triggered::trigger();
        let session = Arc::new(Session {
            config,
            keys,
            services,
            node_id,
            connected: AtomicBool::new(true),
            op_lock: Arc::new(AsyncMutex::new(())),
            events: Arc::new(EventBus::new()),
            lsp_cache: Mutex::new(None),
            fee_quote: Mutex::new(None),
            shutdown_trigger,
            shutdown_listener,
            tasks: Mutex::new(Vec::new()),
        });

        if let Err(e) = session.initialize_storage().await {
            session.connected.store(false, Ordering::SeqCst);
            let _ = node_api.stop().await;
            return Err(SdkError::ConnectError(e.to_string()));
        }

        if let Err(e) = session.sync().await {
            warn!("initial sync failed: {}", e);
        }
        session.start_background_sync();
        Ok(session)
    }

    async fn initialize_storage(&self) -> SdkResult<()> {
        let persister = &self.services.persister;
        if persister.is_empty()? {
            let restored = self.restore_from_backup().await?;
            debug!("fresh storage, restored from backup: {}", restored);
        }
        if persister.get_lsp_id()?.is_none() {
            if let Some(lsp_id) = self.config.default_lsp_id.as_ref() {
                info!("selecting default lsp {}", lsp_id);
                persister.set_lsp_id(lsp_id)?;
            }
        }
        Ok(())
    }

    fn start_background_sync(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown_listener.clone();
        let interval = self.config.sync_interval();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.clone() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let session = match weak.upgrade() {
                    Some(session) => session,
                    None => break,
                };
                if let Err(e) = session.sync().await {
                    warn!("background sync failed: {}", e);
                    continue;
                }
                if session.config.auto_backup && session.backup_needed() {
                    if let Err(e) = session.backup().await {
                        warn!("background backup failed: {}", e);
                    }
                }
            }
            debug!("background sync stopped");
        });
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    }

    /// Run `task` in the background until it finishes or the session shuts down.
    ///
    /// Disconnect waits for it.
    pub(crate) fn spawn_tracked<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown_listener.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown => debug!("background task stopped by shutdown"),
                _ = task => {}
            }
        });
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// The lock [`Session::lock_op`] takes, for background tasks
    pub(crate) fn op_lock(&self) -> Arc<AsyncMutex<()>> {
        Arc::clone(&self.op_lock)
    }

    /// Fires once disconnect starts
    pub(crate) fn shutdown_listener(&self) -> triggered::Listener {
        self.shutdown_listener.clone()
    }

    async fn join_tasks(&self) {
        let tasks = mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn shutdown(&self) {
        info!("ENTER disconnect");
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown_trigger.trigger();
        self.join_tasks().await;
        // wait for in-flight mutations
        let _guard = self.op_lock.lock().await;
        // tasks those mutations spawned already see the trigger
        self.join_tasks().await;
        if let Err(e) = self.services.node_api.stop().await {
            warn!("node stop failed: {}", e);
        }
        self.events.close();
        info!("REPLY disconnect");
    }

    /// The node id, hex
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The session configuration
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Whether the session is still connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_connected(&self) -> SdkResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SdkError::NotConnected)
        }
    }

    /// Serialize a mutation against every other mutation of this session
    pub(crate) async fn lock_op(&self) -> SdkResult<AsyncMutexGuard<'_, ()>> {
        self.ensure_connected()?;
        let guard = self.op_lock.lock().await;
        // disconnected while queued
        self.ensure_connected()?;
        Ok(guard)
    }

    /// Bound a call to an external service
    pub(crate) async fn net<T, F>(&self, what: &str, fut: F) -> SdkResult<T>
    where
        F: Future<Output = SdkResult<T>>,
    {
        with_timeout(self.config.network_timeout(), what, fut).await
    }

    /// Subscribe to payment, channel and service events
    pub fn subscribe_events(&self) -> EventStream<SdkEvent> {
        self.events.subscribe()
    }

    /// Reconcile local state with the node backend and swap services
    pub async fn sync(&self) -> SdkResult<()> {
        let _guard = self.lock_op().await?;
        self.sync_locked().await
    }

    #[instrument(skip(self))]
    pub(crate) async fn sync_locked(&self) -> SdkResult<()> {
        debug!("ENTER sync");
        let persister = &self.services.persister;
        let started = self.services.clock.now_secs();
        let since = persister.get_u64_setting(settings::LAST_SYNC_TIME)?.unwrap_or(0);
        let response =
            self.net("pull changes", self.services.node_api.pull_changed(since)).await?;

        let previous_state = persister.get_node_state()?;
        let mut updated = Vec::new();
        for remote in response.payments {
            let local = persister.get_payment(&remote.id)?;
            let payment = Payment::merge_remote(local.as_ref(), remote);
            if local.as_ref() == Some(&payment) {
                continue;
            }
            let newly_paid = payment.payment_type == PaymentType::Received
                && payment.status == PaymentStatus::Complete
                && local.map_or(true, |l| l.status != PaymentStatus::Complete);
            if newly_paid {
                self.events.emit(SdkEvent::InvoicePaid {
                    payment_hash: payment.id.clone(),
                    bolt11: payment.bolt11.clone(),
                });
            }
            updated.push(payment);
        }
        persister.insert_or_update_payments(&updated)?;

        let node_state = response.node_state;
        let new_block = previous_state
            .as_ref()
            .map_or(true, |s| s.block_height != node_state.block_height);
        let state_changed = previous_state.as_ref() != Some(&node_state);
        persister.set_node_state(&node_state)?;
        persister.set_setting(settings::LAST_SYNC_TIME, &started.to_string())?;
        if new_block {
            self.events.emit(SdkEvent::NewBlock { block: node_state.block_height });
        }
        if !updated.is_empty() || state_changed {
            self.mark_backup_pending();
        }

        // swap services failing must not fail the node sync
        if let Err(e) = self.refresh_swaps_locked().await {
            warn!("swap refresh failed: {}", e);
        }
        if let Err(e) = self.refresh_reverse_swaps_locked().await {
            warn!("reverse swap refresh failed: {}", e);
        }

        self.events.emit(SdkEvent::Synced);
        debug!("REPLY sync updated={}", updated.len());
        Ok(())
    }

    pub(crate) fn node_state(&self) -> SdkResult<NodeState> {
        self.services
            .persister
            .get_node_state()?
            .ok_or_else(|| SdkError::generic("node state not yet synced"))
    }

    /// Balance, channel count and capacity summary
    pub fn node_info(&self) -> SdkResult<NodeState> {
        self.ensure_connected()?;
        self.node_state()
    }

    /// Fee rate estimates
    pub async fn recommended_fees(&self) -> SdkResult<RecommendedFees> {
        self.ensure_connected()?;
        self.net("recommended fees", self.services.chain_service.recommended_fees()).await
    }

    /// Supported fiat currencies, sorted by name
    pub async fn list_fiat_currencies(&self) -> SdkResult<Vec<FiatCurrency>> {
        self.ensure_connected()?;
        let mut currencies =
            self.net("fiat currencies", self.services.fiat_api.list_fiat_currencies()).await?;
        currencies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(currencies)
    }

    /// Current BTC prices
    pub async fn fetch_fiat_rates(&self) -> SdkResult<Vec<Rate>> {
        self.ensure_connected()?;
        self.net("fiat rates", self.services.fiat_api.fetch_fiat_rates()).await
    }

    /// Send all on-chain funds to `to_address`
    pub async fn sweep(&self, to_address: &str, sat_per_vbyte: u32) -> SdkResult<String> {
        let _guard = self.lock_op().await?;
        self.parse_address(to_address)?;
        if sat_per_vbyte == 0 {
            return Err(SdkError::invalid_input("fee rate must be positive"));
        }
        let txid = self
            .net(
                "sweep",
                self.services.node_api.sweep(to_address.to_string(), sat_per_vbyte),
            )
            .await?;
        info!("swept on-chain funds to {} in {}", to_address, txid);
        self.sync_locked().await?;
        Ok(txid)
    }

    /// Run a backend developer command
    pub async fn execute_dev_command(&self, command: &str) -> SdkResult<String> {
        let _guard = self.lock_op().await?;
        self.net("dev command", self.services.node_api.execute_command(command.to_string())).await
    }

    pub(crate) fn parse_address(&self, address: &str) -> SdkResult<bitcoin::Address> {
        use core::str::FromStr;
        bitcoin::Address::from_str(address.trim())
            .map_err(|e| SdkError::invalid_input(format!("address {}: {}", address, e)))?
            .require_network(self.config.network)
            .map_err(|e| SdkError::invalid_input(format!("address {}: {}", address, e)))
    }
}
