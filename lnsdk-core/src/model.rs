use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::serde_as;

/// Direction of a payment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    /// We paid
    Sent,
    /// We were paid
    Received,
}

/// Payment status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// In flight
    Pending,
    /// Settled
    Complete,
    /// Failed, no funds moved
    Failed,
}

/// Which payments to list
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTypeFilter {
    /// Only sent payments
    Sent,
    /// Only received payments
    Received,
    /// Everything
    All,
}

impl core::str::FromStr for PaymentTypeFilter {
    type Err = crate::error::SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sent" => Ok(PaymentTypeFilter::Sent),
            "received" => Ok(PaymentTypeFilter::Received),
            "all" => Ok(PaymentTypeFilter::All),
            other => Err(crate::error::SdkError::invalid_input(format!("filter {}", other))),
        }
    }
}

/// LNURL context attached to a payment
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlPaymentInfo {
    /// Domain of the LNURL-pay service
    pub lnurl_pay_domain: Option<String>,
    /// Lightning address, if the payment was made to one
    pub ln_address: Option<String>,
    /// LNURL-pay metadata string
    pub lnurl_metadata: Option<String>,
    /// Comment sent along with the payment
    pub lnurl_comment: Option<String>,
    /// Processed success action, as JSON
    pub lnurl_success_action: Option<serde_json::Value>,
    /// Callback of the LNURL-withdraw service
    pub lnurl_withdraw_endpoint: Option<String>,
}

/// A lightning payment record, identified by payment hash
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment hash, hex
    pub id: String,
    /// Direction
    pub payment_type: PaymentType,
    /// Seconds since the UNIX epoch
    pub payment_time: u64,
    /// Amount, excluding fees
    pub amount_msat: u64,
    /// Routing or channel opening fee
    pub fee_msat: u64,
    /// Status
    pub status: PaymentStatus,
    /// Failure reason, for failed payments
    pub error: Option<String>,
    /// Invoice description
    pub description: Option<String>,
    /// Counterparty node
    pub destination_pubkey: String,
    /// The invoice, if any
    pub bolt11: Option<String>,
    /// Preimage, hex, once known
    pub payment_preimage: Option<String>,
    /// Spontaneous payment
    pub keysend: bool,
    /// LNURL context
    pub lnurl_info: Option<LnurlPaymentInfo>,
    /// Deposit address of the swap this payment redeemed
    pub swap_address: Option<String>,
    /// Reverse swap this payment funded
    pub reverse_swap_id: Option<String>,
}

impl Payment {
    /// Whether this payment reached a terminal state
    pub fn is_final(&self) -> bool {
        self.status != PaymentStatus::Pending
    }

    /// Merge a record reported by the node backend into a local record.
    ///
    /// The remote ledger is authoritative for amounts and status. Locally known context
    /// (LNURL, swap linkage, description) survives when the remote lacks it.
    pub fn merge_remote(local: Option<&Payment>, mut remote: Payment) -> Payment {
        if let Some(local) = local {
            if remote.lnurl_info.is_none() {
                remote.lnurl_info = local.lnurl_info.clone();
            }
            if remote.swap_address.is_none() {
                remote.swap_address = local.swap_address.clone();
            }
            if remote.reverse_swap_id.is_none() {
                remote.reverse_swap_id = local.reverse_swap_id.clone();
            }
            if remote.description.is_none() {
                remote.description = local.description.clone();
            }
            if remote.bolt11.is_none() {
                remote.bolt11 = local.bolt11.clone();
            }
        }
        remote
    }
}

/// Node summary
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Node id, hex
    pub id: String,
    /// Chain tip seen by the node
    pub block_height: u32,
    /// Spendable lightning balance
    pub channels_balance_msat: u64,
    /// Confirmed on-chain balance
    pub onchain_balance_msat: u64,
    /// Number of usable channels
    pub channel_count: u32,
    /// Total capacity of usable channels
    pub total_channel_capacity_msat: u64,
    /// Largest amount we can send
    pub max_payable_msat: u64,
    /// Largest amount we can receive without a new channel
    pub max_receivable_msat: u64,
    /// Largest single HTLC we can send
    pub max_single_payment_amount_msat: u64,
    /// Inbound liquidity across channels
    pub inbound_liquidity_msats: u64,
    /// Connected peers, hex node ids
    pub connected_peers: Vec<String>,
}

impl NodeState {
    /// Total balance, lightning plus on-chain, in satoshis
    pub fn balance_sat(&self) -> u64 {
        (self.channels_balance_msat + self.onchain_balance_msat) / 1000
    }
}

/// Submarine swap status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    /// Address handed out, nothing received
    Initial,
    /// Funds seen, not yet confirmed
    WaitingConfirmation,
    /// Funds confirmed, waiting for the swapper to pay us
    Redeemable,
    /// We were paid
    Redeemed,
    /// Lock height passed with funds still on the address
    Refundable,
    /// Nothing left on the address
    Completed,
}

impl SwapStatus {
    /// Whether the swap is still pending
    pub fn is_in_progress(&self) -> bool {
        matches!(self, SwapStatus::Initial | SwapStatus::WaitingConfirmation | SwapStatus::Redeemable)
    }
}

/// A submarine swap, identified by its deposit address
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInfo {
    /// Deposit address
    pub bitcoin_address: String,
    /// Seconds since the UNIX epoch
    pub created_at: u64,
    /// Relative lock, in blocks
    pub lock_height: u32,
    /// Payment hash
    #[serde_as(as = "Hex")]
    pub payment_hash: Vec<u8>,
    /// Payment preimage
    #[serde_as(as = "Hex")]
    pub preimage: Vec<u8>,
    /// Refund key
    #[serde_as(as = "Hex")]
    pub private_key: Vec<u8>,
    /// Refund public key
    #[serde_as(as = "Hex")]
    pub public_key: Vec<u8>,
    /// Swapper claim public key
    #[serde_as(as = "Hex")]
    pub swapper_public_key: Vec<u8>,
    /// Witness script
    #[serde_as(as = "Hex")]
    pub script: Vec<u8>,
    /// Invoice handed to the swapper
    pub bolt11: Option<String>,
    /// Amount we were paid
    pub paid_msat: u64,
    /// Confirmed deposit
    pub confirmed_sats: u64,
    /// Unconfirmed deposit
    pub unconfirmed_sats: u64,
    /// Height of the first confirmed deposit
    pub confirmed_at: Option<u32>,
    /// Status
    pub status: SwapStatus,
    /// Refund transactions we broadcast
    pub refund_tx_ids: Vec<String>,
    /// Address funds were refunded to
    pub refund_address: Option<String>,
    /// Confirmed deposit transactions
    pub confirmed_tx_ids: Vec<String>,
    /// Unconfirmed deposit transactions
    pub unconfirmed_tx_ids: Vec<String>,
    /// Smallest deposit the swapper accepts
    pub min_allowed_deposit: u64,
    /// Largest deposit that can be redeemed
    pub max_allowed_deposit: u64,
    /// Most recent redeem failure
    pub last_redeem_error: Option<String>,
}

/// Reverse swap status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseSwapStatus {
    /// Created, hold invoice not yet paid
    Initial,
    /// Hold invoice paid, lockup pending or claim not yet broadcast
    InProgress,
    /// The swap failed or expired
    Cancelled,
    /// Claim transaction broadcast
    CompletedSeen,
    /// Claim transaction confirmed
    CompletedConfirmed,
}

impl ReverseSwapStatus {
    /// Whether the reverse swap is still pending
    pub fn is_in_progress(&self) -> bool {
        matches!(self, ReverseSwapStatus::Initial | ReverseSwapStatus::InProgress)
    }

    /// Whether the reverse swap reached a terminal state
    pub fn is_final(&self) -> bool {
        matches!(self, ReverseSwapStatus::Cancelled | ReverseSwapStatus::CompletedConfirmed)
    }
}

/// A reverse swap, identified by the swapper's id
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseSwapInfo {
    /// Swapper assigned id
    pub id: String,
    /// Seconds since the UNIX epoch
    pub created_at: u64,
    /// Claim public key, hex
    pub claim_pubkey: String,
    /// Claim key
    #[serde_as(as = "Hex")]
    pub claim_private_key: Vec<u8>,
    /// Preimage of the hold invoice
    #[serde_as(as = "Hex")]
    pub preimage: Vec<u8>,
    /// Absolute refund height of the lockup
    pub timeout_block_height: u32,
    /// Hold invoice
    pub invoice: String,
    /// Lightning amount
    pub invoice_amount_sat: u64,
    /// Lockup witness script
    #[serde_as(as = "Hex")]
    pub redeem_script: Vec<u8>,
    /// Lockup address
    pub lockup_address: String,
    /// Where the claimed funds go
    pub onchain_recipient_address: String,
    /// Amount locked on chain
    pub onchain_amount_sat: u64,
    /// Claim fee rate
    pub sat_per_vbyte: u32,
    /// Lockup transaction, once seen
    pub lockup_txid: Option<String>,
    /// Claim transaction, once broadcast
    pub claim_txid: Option<String>,
    /// Status
    pub status: ReverseSwapStatus,
    /// Failure reason
    pub error: Option<String>,
}

/// Reverse swap fee schedule
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReverseSwapPairInfo {
    /// Identifies this quote
    pub fees_hash: String,
    /// Smallest on-chain amount
    pub min: u64,
    /// Largest on-chain amount
    pub max: u64,
    /// Service fee, percent of the on-chain amount
    pub fees_percentage: f64,
    /// Lockup transaction fee, in satoshis
    pub fees_lockup: u64,
    /// Estimated claim transaction fee, in satoshis
    pub fees_claim: u64,
}

impl ReverseSwapPairInfo {
    /// Service plus lockup fee, paid over lightning on top of `amount_sat`
    pub fn service_fees(&self, amount_sat: u64) -> u64 {
        let percentage = (amount_sat as f64 * self.fees_percentage / 100.0).ceil() as u64;
        percentage.saturating_add(self.fees_lockup)
    }
}

/// LSP details
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LspInformation {
    /// LSP id
    pub id: String,
    /// Display name
    pub name: String,
    /// Web page
    pub widget_url: String,
    /// Node id, hex
    pub pubkey: String,
    /// host:port
    pub host: String,
    /// Routing base fee
    pub base_fee_msat: u64,
    /// Routing proportional fee, as a fraction
    pub fee_rate: f64,
    /// CLTV delta of the LSP hop
    pub time_lock_delta: u32,
    /// Smallest HTLC the LSP forwards
    pub min_htlc_msat: u64,
    /// Channel opening fee, per myriad of the amount
    pub channel_fee_permyriad: u64,
    /// Minimum channel opening fee
    pub channel_minimum_fee_msat: u64,
}

impl LspInformation {
    /// Channel opening fee for an incoming amount
    pub fn opening_fee_msat(&self, amount_msat: u64) -> u64 {
        let proportional = amount_msat.saturating_mul(self.channel_fee_permyriad) / 10_000;
        proportional.max(self.channel_minimum_fee_msat)
    }
}

/// What the LSP needs to forward a payment into a new channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInformation {
    /// Payment hash, hex
    pub payment_hash: String,
    /// Payment secret, hex
    pub payment_secret: String,
    /// Our node id, hex
    pub destination: String,
    /// What the payer sends
    pub incoming_amount_msat: u64,
    /// What we receive
    pub outgoing_amount_msat: u64,
}

/// Fee rates, in sat/vbyte
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedFees {
    /// Next block
    pub fastest_fee: u64,
    /// Within 3 blocks
    pub half_hour_fee: u64,
    /// Within 6 blocks
    pub hour_fee: u64,
    /// Within a day
    pub economy_fee: u64,
    /// Relay minimum
    pub minimum_fee: u64,
}

/// A fiat currency
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiatCurrency {
    /// ISO code
    pub id: String,
    /// Display name
    pub name: String,
    /// Digits after the decimal point
    pub fraction_size: u32,
    /// Symbol
    pub symbol: Option<String>,
}

/// BTC price in a fiat currency
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    /// ISO code
    pub coin: String,
    /// Price of one BTC
    pub value: f64,
}

/// Backup progress
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupState {
    /// Local changes not yet uploaded
    Pending,
    /// Upload running
    InProgress,
    /// Remote matches local
    Synced,
    /// Last attempt failed
    Failed,
}

/// Backup status
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupStatus {
    /// Current state
    pub state: BackupState,
    /// Seconds since the UNIX epoch of the last successful backup
    pub last_backup_time: Option<u64>,
    /// Reason of the last failure
    pub last_error: Option<String>,
}

impl Default for BackupStatus {
    fn default() -> Self {
        BackupStatus { state: BackupState::Pending, last_backup_time: None, last_error: None }
    }
}

/// Everything a backup carries
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Payment records
    pub payments: Vec<Payment>,
    /// Submarine swaps
    pub swaps: Vec<SwapInfo>,
    /// Reverse swaps
    pub reverse_swaps: Vec<ReverseSwapInfo>,
    /// Selected LSP
    pub lsp_id: Option<String>,
    /// Last known node state
    pub node_state: Option<NodeState>,
    /// Opaque channel state from the node backend
    #[serde_as(as = "Hex")]
    pub channel_state: Vec<u8>,
}
