use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SdkResult;
use crate::model::{NodeState, Payment};
use crate::SendSync;

/// Changes reported by the node backend
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Current node summary
    pub node_state: NodeState,
    /// Payments created or updated since the requested time
    pub payments: Vec<Payment>,
}

/// An invoice the node should accept payments for
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInvoiceRequest {
    /// The invoice handed to the payer
    pub bolt11: String,
    /// Payment hash, hex
    pub payment_hash: String,
    /// Payment preimage, hex
    pub preimage: String,
    /// Payment secret, hex
    pub payment_secret: String,
    /// What the node will actually receive, after any LSP fee
    pub amount_msat: u64,
    /// Description
    pub description: String,
    /// Expiry, in seconds
    pub expiry_secs: u64,
}

/// Parameters for an outgoing invoice payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPaymentRequest {
    /// The invoice
    pub bolt11: String,
    /// Amount for zero-amount invoices
    pub amount_msat: Option<u64>,
    /// Routing fee cap
    pub max_fee_msat: u64,
}

/// The node backend.
///
/// Owns channels and the lightning wallet. All methods report failures with the SDK error
/// kinds, e.g. [`crate::error::SdkError::RouteNotFound`] when no path exists.
#[async_trait]
pub trait NodeAPI: SendSync {
    /// Handshake with the backend, returning the node id
    async fn start(&self) -> SdkResult<String>;
    /// Release backend resources
    async fn stop(&self) -> SdkResult<()>;
    /// Node state, and payments changed at or after `since_timestamp`
    async fn pull_changed(&self, since_timestamp: u64) -> SdkResult<SyncResponse>;
    /// Pay an invoice, returning the settled payment
    async fn send_payment(&self, req: SendPaymentRequest) -> SdkResult<Payment>;
    /// Keysend
    async fn send_spontaneous_payment(
        &self,
        node_id: String,
        amount_msat: u64,
        max_fee_msat: u64,
    ) -> SdkResult<Payment>;
    /// Make the node accept payments for an invoice we created
    async fn register_invoice(&self, req: RegisterInvoiceRequest) -> SdkResult<()>;
    /// Connect to a peer at `host`
    async fn connect_peer(&self, node_id: String, host: String) -> SdkResult<()>;
    /// Cooperatively close all channels with a peer, returning closing txids
    async fn close_peer_channels(&self, node_id: String) -> SdkResult<Vec<String>>;
    /// Send all on-chain funds to an address
    async fn sweep(&self, to_address: String, sat_per_vbyte: u32) -> SdkResult<String>;
    /// Opaque channel state for backups
    async fn channel_state_backup(&self) -> SdkResult<Vec<u8>>;
    /// Restore channel state from a backup
    async fn restore_channel_state(&self, data: Vec<u8>) -> SdkResult<()>;
    /// Backend specific developer command
    async fn execute_command(&self, command: String) -> SdkResult<String>;
}
