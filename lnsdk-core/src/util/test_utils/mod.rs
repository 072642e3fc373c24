pub mod invoice;

use core::str::FromStr;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use core::time::Duration;
use std::path::PathBuf;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use serde_json::json;

use crate::backup::BackupTransport;
use crate::chain::{ChainService, OnchainTx, TxStatus, Vin, Vout};
use crate::config::{ConfigResolver, EnvironmentType, NodeBackend, NodeConfig};
use crate::error::{SdkError, SdkResult};
use crate::fiat::FiatAPI;
use crate::invoice::{parse_invoice, InvoiceDescription};
use crate::lsp::LspAPI;
use crate::model::{
    FiatCurrency, LspInformation, NodeState, Payment, PaymentInformation, PaymentStatus,
    PaymentType, Rate, RecommendedFees, ReverseSwapPairInfo, SwapInfo, SwapStatus,
};
use crate::node_api::{NodeAPI, RegisterInvoiceRequest, SendPaymentRequest, SyncResponse};
use crate::persist::MemoryPersister;
use crate::prelude::*;
use crate::rest::RestClient;
use crate::reverse_swap::{
    create_reverse_swap_script, CreateReverseSwapResponse, ReverseSwapperAPI,
    ReverseSwapperStatus,
};
use crate::seed::{derive_seed, KeyMaterial, Seed};
use crate::session::SessionServices;
use crate::swap::{create_submarine_swap_script, swap_address, SwapperAPI, SwapperResponse};
use crate::util::clock::{Clock, ManualClock};
use crate::util::crypto_utils::{random_bytes, sha256};
use crate::{Arc, SendSync};

pub use self::invoice::*;

/// BIP-39 test vector
pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
/// The first LSP [`MockLspAPI`] offers
pub const TEST_LSP_ID: &str = "lsp-1";
/// A regtest P2WPKH address
pub const TEST_REGTEST_ADDRESS: &str = "bcrt1qzyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3lgth6c";
/// Start of time for [`TestEnv`] clocks
pub const TEST_START_TIME_SECS: u64 = 1_700_000_000;

const SWAPPER_KEY: [u8; 32] = [77; 32];
const REVERSE_SWAPPER_INVOICE_KEY: [u8; 32] = [88; 32];
const REVERSE_SWAPPER_REFUND_KEY: [u8; 32] = [89; 32];
const SWAP_LOCK_HEIGHT: u32 = 144;
const REVERSE_SWAP_TIMEOUT_BLOCKS: u32 = 144;

/// Hex node id of the key `[n; 32]`
pub fn test_pubkey(n: u8) -> String {
    let key = SecretKey::from_slice(&[n; 32]).unwrap();
    PublicKey::from_secret_key(&Secp256k1::new(), &key).to_string()
}

pub fn make_test_payment(n: u8, payment_type: PaymentType, payment_time: u64) -> Payment {
    Payment {
        id: hex::encode([n; 32]),
        payment_type,
        payment_time,
        amount_msat: n as u64 * 1000,
        fee_msat: 0,
        status: PaymentStatus::Complete,
        error: None,
        description: Some(format!("payment {}", n)),
        destination_pubkey: test_pubkey(n),
        bolt11: None,
        payment_preimage: None,
        keysend: false,
        lnurl_info: None,
        swap_address: None,
        reverse_swap_id: None,
    }
}

pub fn make_test_lsp(id: &str, pubkey: &str) -> LspInformation {
    LspInformation {
        id: id.to_string(),
        name: format!("LSP {}", id),
        widget_url: String::new(),
        pubkey: pubkey.to_string(),
        host: "127.0.0.1:9735".to_string(),
        base_fee_msat: 1000,
        fee_rate: 0.00001,
        time_lock_delta: 144,
        min_htlc_msat: 600,
        channel_fee_permyriad: 40,
        channel_minimum_fee_msat: 2_000_000,
    }
}

pub fn make_test_swap(address: &str) -> SwapInfo {
    SwapInfo {
        bitcoin_address: address.to_string(),
        created_at: TEST_START_TIME_SECS,
        lock_height: SWAP_LOCK_HEIGHT,
        payment_hash: vec![1; 32],
        preimage: vec![2; 32],
        private_key: vec![3; 32],
        public_key: vec![],
        swapper_public_key: vec![],
        script: vec![],
        bolt11: None,
        paid_msat: 0,
        confirmed_sats: 0,
        unconfirmed_sats: 0,
        confirmed_at: None,
        status: SwapStatus::Initial,
        refund_tx_ids: vec![],
        refund_address: None,
        confirmed_tx_ids: vec![],
        unconfirmed_tx_ids: vec![],
        min_allowed_deposit: 1_000,
        max_allowed_deposit: 1_000_000,
        last_redeem_error: None,
    }
}

fn random_txid_hex() -> String {
    hex::encode(random_bytes::<32>())
}

struct TrackedPayment {
    payment: Payment,
    changed_at: u64,
}

struct MockNodeState {
    started: bool,
    fail_start: Option<String>,
    block_height: u32,
    channels_balance_msat: u64,
    onchain_balance_msat: u64,
    max_receivable_msat: u64,
    channel_count: u32,
    peers: Vec<String>,
    payments: OrderedMap<String, TrackedPayment>,
    invoices: OrderedMap<String, RegisterInvoiceRequest>,
    route_not_found: bool,
    send_delay: Option<Duration>,
    restored_channel_state: Option<Vec<u8>>,
}

/// A node backend holding balances and payments in memory
pub struct MockNodeAPI {
    node_id: String,
    clock: Arc<dyn Clock>,
    state: Mutex<MockNodeState>,
    pulls_in_flight: AtomicUsize,
    max_pulls_in_flight: AtomicUsize,
}

impl SendSync for MockNodeAPI {}

impl MockNodeAPI {
    pub fn new(node_key: &SecretKey, clock: Arc<dyn Clock>) -> Self {
        let node_id = PublicKey::from_secret_key(&Secp256k1::new(), node_key).to_string();
        MockNodeAPI {
            node_id,
            clock,
            state: Mutex::new(MockNodeState {
                started: false,
                fail_start: None,
                block_height: 100,
                channels_balance_msat: 0,
                onchain_balance_msat: 0,
                max_receivable_msat: 0,
                channel_count: 0,
                peers: vec![],
                payments: OrderedMap::new(),
                invoices: OrderedMap::new(),
                route_not_found: false,
                send_delay: None,
                restored_channel_state: None,
            }),
            pulls_in_flight: AtomicUsize::new(0),
            max_pulls_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn set_fail_start(&self, reason: Option<String>) {
        self.state.lock().unwrap().fail_start = reason;
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().unwrap().started
    }

    pub fn set_balances(&self, channels_msat: u64, onchain_msat: u64, max_receivable_msat: u64) {
        let mut state = self.state.lock().unwrap();
        state.channels_balance_msat = channels_msat;
        state.onchain_balance_msat = onchain_msat;
        state.max_receivable_msat = max_receivable_msat;
    }

    pub fn set_block_height(&self, height: u32) {
        self.state.lock().unwrap().block_height = height;
    }

    pub fn set_channel_count(&self, count: u32) {
        self.state.lock().unwrap().channel_count = count;
    }

    pub fn set_route_not_found(&self, route_not_found: bool) {
        self.state.lock().unwrap().route_not_found = route_not_found;
    }

    pub fn set_send_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().send_delay = delay;
    }

    /// Most `pull_changed` calls ever seen running at once
    pub fn max_concurrent_pulls(&self) -> usize {
        self.max_pulls_in_flight.load(Ordering::SeqCst)
    }

    pub fn peers(&self) -> Vec<String> {
        self.state.lock().unwrap().peers.clone()
    }

    pub fn restored_channel_state(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().restored_channel_state.clone()
    }

    /// Record a payment, as if the node learned about it
    pub fn add_payment(&self, payment: Payment) {
        let changed_at = self.clock.now_secs();
        let mut state = self.state.lock().unwrap();
        state.payments.insert(payment.id.clone(), TrackedPayment { payment, changed_at });
    }

    /// Settle an invoice registered with this node, as if a payer sent `amount_msat`
    pub fn receive(&self, bolt11: &str, amount_msat: u64) -> SdkResult<Payment> {
        let mut state = self.state.lock().unwrap();
        let invoice = state
            .invoices
            .get(bolt11)
            .cloned()
            .ok_or_else(|| SdkError::invalid_input("unknown invoice"))?;
        if state.payments.contains_key(&invoice.payment_hash) {
            return Err(SdkError::invalid_input("invoice already paid"));
        }
        let credited = invoice.amount_msat;
        if credited > state.max_receivable_msat {
            // a just-in-time channel from the LSP
            state.channel_count += 1;
        } else {
            state.max_receivable_msat -= credited;
        }
        state.channels_balance_msat += credited;
        let payment = Payment {
            id: invoice.payment_hash.clone(),
            payment_type: PaymentType::Received,
            payment_time: self.clock.now_secs(),
            amount_msat: credited,
            fee_msat: amount_msat.saturating_sub(credited),
            status: PaymentStatus::Complete,
            error: None,
            description: Some(invoice.description.clone()),
            destination_pubkey: self.node_id.clone(),
            bolt11: Some(invoice.bolt11.clone()),
            payment_preimage: Some(invoice.preimage.clone()),
            keysend: false,
            lnurl_info: None,
            swap_address: None,
            reverse_swap_id: None,
        };
        let changed_at = self.clock.now_secs();
        state
            .payments
            .insert(payment.id.clone(), TrackedPayment { payment: payment.clone(), changed_at });
        Ok(payment)
    }

    fn node_state(&self, state: &MockNodeState) -> NodeState {
        NodeState {
            id: self.node_id.clone(),
            block_height: state.block_height,
            channels_balance_msat: state.channels_balance_msat,
            onchain_balance_msat: state.onchain_balance_msat,
            channel_count: state.channel_count,
            total_channel_capacity_msat: state.channels_balance_msat + state.max_receivable_msat,
            max_payable_msat: state.channels_balance_msat,
            max_receivable_msat: state.max_receivable_msat,
            max_single_payment_amount_msat: state.channels_balance_msat,
            inbound_liquidity_msats: state.max_receivable_msat,
            connected_peers: state.peers.clone(),
        }
    }

    fn debit(&self, state: &mut MockNodeState, amount_msat: u64) -> SdkResult<()> {
        if state.route_not_found {
            return Err(SdkError::RouteNotFound("no route".into()));
        }
        if amount_msat > state.channels_balance_msat {
            return Err(SdkError::InsufficientFunds(format!(
                "{} msat over {} msat",
                amount_msat, state.channels_balance_msat
            )));
        }
        state.channels_balance_msat -= amount_msat;
        state.max_receivable_msat += amount_msat;
        Ok(())
    }

    async fn send_delay(&self) {
        let delay = self.state.lock().unwrap().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl NodeAPI for MockNodeAPI {
    async fn start(&self) -> SdkResult<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.fail_start.as_ref() {
            return Err(SdkError::generic(reason.clone()));
        }
        state.started = true;
        Ok(self.node_id.clone())
    }

    async fn stop(&self) -> SdkResult<()> {
        self.state.lock().unwrap().started = false;
        Ok(())
    }

    async fn pull_changed(&self, since_timestamp: u64) -> SdkResult<SyncResponse> {
        let in_flight = self.pulls_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_pulls_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let response = {
            let state = self.state.lock().unwrap();
            SyncResponse {
                node_state: self.node_state(&state),
                payments: state
                    .payments
                    .values()
                    .filter(|p| p.changed_at >= since_timestamp)
                    .map(|p| p.payment.clone())
                    .collect(),
            }
        };
        self.pulls_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(response)
    }

    async fn send_payment(&self, req: SendPaymentRequest) -> SdkResult<Payment> {
        self.send_delay().await;
        let invoice = parse_invoice(&req.bolt11)?;
        let amount_msat = invoice
            .amount_msat
            .or(req.amount_msat)
            .ok_or_else(|| SdkError::invalid_input("no amount"))?;
        let mut state = self.state.lock().unwrap();
        self.debit(&mut state, amount_msat)?;
        let payment = Payment {
            id: invoice.payment_hash.clone(),
            payment_type: PaymentType::Sent,
            payment_time: self.clock.now_secs(),
            amount_msat,
            fee_msat: 0,
            status: PaymentStatus::Complete,
            error: None,
            description: invoice.description.clone(),
            destination_pubkey: invoice.payee_pubkey.clone(),
            bolt11: Some(req.bolt11.clone()),
            payment_preimage: Some(random_txid_hex()),
            keysend: false,
            lnurl_info: None,
            swap_address: None,
            reverse_swap_id: None,
        };
        let changed_at = self.clock.now_secs();
        state
            .payments
            .insert(payment.id.clone(), TrackedPayment { payment: payment.clone(), changed_at });
        Ok(payment)
    }

    async fn send_spontaneous_payment(
        &self,
        node_id: String,
        amount_msat: u64,
        _max_fee_msat: u64,
    ) -> SdkResult<Payment> {
        self.send_delay().await;
        let mut state = self.state.lock().unwrap();
        self.debit(&mut state, amount_msat)?;
        let preimage = random_bytes::<32>();
        let payment = Payment {
            id: hex::encode(sha256(&preimage)),
            payment_type: PaymentType::Sent,
            payment_time: self.clock.now_secs(),
            amount_msat,
            fee_msat: 0,
            status: PaymentStatus::Complete,
            error: None,
            description: None,
            destination_pubkey: node_id,
            bolt11: None,
            payment_preimage: Some(hex::encode(preimage)),
            keysend: true,
            lnurl_info: None,
            swap_address: None,
            reverse_swap_id: None,
        };
        let changed_at = self.clock.now_secs();
        state
            .payments
            .insert(payment.id.clone(), TrackedPayment { payment: payment.clone(), changed_at });
        Ok(payment)
    }

    async fn register_invoice(&self, req: RegisterInvoiceRequest) -> SdkResult<()> {
        self.state.lock().unwrap().invoices.insert(req.bolt11.clone(), req);
        Ok(())
    }

    async fn connect_peer(&self, node_id: String, _host: String) -> SdkResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.peers.contains(&node_id) {
            state.peers.push(node_id);
        }
        Ok(())
    }

    async fn close_peer_channels(&self, _node_id: String) -> SdkResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        if state.channel_count == 0 {
            return Ok(vec![]);
        }
        state.onchain_balance_msat += state.channels_balance_msat;
        state.channels_balance_msat = 0;
        state.max_receivable_msat = 0;
        let txids = (0..state.channel_count).map(|_| random_txid_hex()).collect();
        state.channel_count = 0;
        Ok(txids)
    }

    async fn sweep(&self, _to_address: String, _sat_per_vbyte: u32) -> SdkResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.onchain_balance_msat == 0 {
            return Err(SdkError::InsufficientFunds("nothing to sweep".into()));
        }
        state.onchain_balance_msat = 0;
        Ok(random_txid_hex())
    }

    async fn channel_state_backup(&self) -> SdkResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        Ok(json!({
            "channels": state.channel_count,
            "balance_msat": state.channels_balance_msat,
        })
        .to_string()
        .into_bytes())
    }

    async fn restore_channel_state(&self, data: Vec<u8>) -> SdkResult<()> {
        self.state.lock().unwrap().restored_channel_state = Some(data);
        Ok(())
    }

    async fn execute_command(&self, command: String) -> SdkResult<String> {
        match command.as_str() {
            "getinfo" => {
                let state = self.state.lock().unwrap();
                Ok(json!({
                    "id": self.node_id,
                    "blockheight": state.block_height,
                    "num_peers": state.peers.len(),
                })
                .to_string())
            }
            other => Err(SdkError::invalid_input(format!("unknown command {}", other))),
        }
    }
}

/// Offers [`TEST_LSP_ID`] and a second LSP
pub struct MockLspAPI {
    lsps: Vec<LspInformation>,
    registered: Mutex<Vec<PaymentInformation>>,
}

impl SendSync for MockLspAPI {}

impl MockLspAPI {
    pub fn new() -> Self {
        MockLspAPI {
            lsps: vec![
                make_test_lsp(TEST_LSP_ID, &test_pubkey(10)),
                make_test_lsp("lsp-2", &test_pubkey(11)),
            ],
            registered: Mutex::new(vec![]),
        }
    }

    /// Payments registered for just-in-time channels
    pub fn registered(&self) -> Vec<PaymentInformation> {
        self.registered.lock().unwrap().clone()
    }
}

#[async_trait]
impl LspAPI for MockLspAPI {
    async fn list_lsps(&self, _node_pubkey: String) -> SdkResult<Vec<LspInformation>> {
        Ok(self.lsps.clone())
    }

    async fn register_payment(
        &self,
        lsp_id: String,
        lsp_pubkey: String,
        payment_info: PaymentInformation,
    ) -> SdkResult<()> {
        if !self.lsps.iter().any(|lsp| lsp.id == lsp_id && lsp.pubkey == lsp_pubkey) {
            return Err(SdkError::UnknownLsp(lsp_id));
        }
        self.registered.lock().unwrap().push(payment_info);
        Ok(())
    }
}

/// A confirmed or unconfirmed transaction known to [`MockChainService`]
struct ChainTx {
    tx: Transaction,
    height: Option<u32>,
}

struct ChainState {
    tip: u32,
    txs: Vec<ChainTx>,
    broadcasts: Vec<Transaction>,
    funding_count: u32,
}

/// An in-memory chain, mined by hand
pub struct MockChainService {
    network: Network,
    state: Mutex<ChainState>,
}

impl SendSync for MockChainService {}

impl MockChainService {
    pub fn new(network: Network) -> Self {
        MockChainService {
            network,
            state: Mutex::new(ChainState {
                tip: 100,
                txs: vec![],
                broadcasts: vec![],
                funding_count: 0,
            }),
        }
    }

    pub fn tip(&self) -> u32 {
        self.state.lock().unwrap().tip
    }

    /// Transactions handed to `broadcast_transaction`, oldest first
    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    /// Pay `value_sat` to `address` from nowhere, confirmed at `height` if given
    pub fn fund_address(&self, address: &str, value_sat: u64, height: Option<u32>) -> Txid {
        let script_pubkey = Address::from_str(address)
            .unwrap()
            .require_network(self.network)
            .unwrap()
            .script_pubkey();
        let mut state = self.state.lock().unwrap();
        state.funding_count += 1;
        let source = Txid::from_byte_array(sha256(&state.funding_count.to_be_bytes()));
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint { txid: source, vout: 0 },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut { value: Amount::from_sat(value_sat), script_pubkey }],
        };
        let txid = tx.compute_txid();
        state.txs.push(ChainTx { tx, height });
        txid
    }

    /// Confirm pending transactions in the next block, then advance the tip by `blocks`
    pub fn mine(&self, blocks: u32) {
        let mut state = self.state.lock().unwrap();
        let next = state.tip + 1;
        for chain_tx in state.txs.iter_mut().filter(|t| t.height.is_none()) {
            chain_tx.height = Some(next);
        }
        state.tip += blocks;
    }

    fn to_vout(&self, output: &TxOut) -> Vout {
        Vout {
            scriptpubkey: hex::encode(output.script_pubkey.as_bytes()),
            scriptpubkey_address: Address::from_script(&output.script_pubkey, self.network)
                .ok()
                .map(|a| a.to_string()),
            value: output.value.to_sat(),
        }
    }

    fn to_onchain_tx(&self, state: &ChainState, chain_tx: &ChainTx) -> OnchainTx {
        let vin = chain_tx
            .tx
            .input
            .iter()
            .map(|input| {
                let prev = input.previous_output;
                let prevout = state
                    .txs
                    .iter()
                    .find(|t| t.tx.compute_txid() == prev.txid)
                    .and_then(|t| t.tx.output.get(prev.vout as usize))
                    .map(|o| self.to_vout(o));
                Vin { txid: prev.txid.to_string(), vout: prev.vout, prevout }
            })
            .collect();
        OnchainTx {
            txid: chain_tx.tx.compute_txid().to_string(),
            vin,
            vout: chain_tx.tx.output.iter().map(|o| self.to_vout(o)).collect(),
            status: TxStatus {
                confirmed: chain_tx.height.is_some(),
                block_height: chain_tx.height,
                block_time: None,
            },
        }
    }
}

#[async_trait]
impl ChainService for MockChainService {
    async fn recommended_fees(&self) -> SdkResult<RecommendedFees> {
        Ok(RecommendedFees {
            fastest_fee: 20,
            half_hour_fee: 15,
            hour_fee: 10,
            economy_fee: 5,
            minimum_fee: 1,
        })
    }

    async fn address_transactions(&self, address: String) -> SdkResult<Vec<OnchainTx>> {
        let state = self.state.lock().unwrap();
        let touches = |tx: &OnchainTx| {
            tx.vout.iter().any(|o| o.scriptpubkey_address.as_deref() == Some(address.as_str()))
                || tx.vin.iter().any(|i| {
                    i.prevout.as_ref().and_then(|o| o.scriptpubkey_address.as_deref())
                        == Some(address.as_str())
                })
        };
        Ok(state
            .txs
            .iter()
            .map(|t| self.to_onchain_tx(&state, t))
            .filter(|t| touches(t))
            .collect())
    }

    async fn current_tip(&self) -> SdkResult<u32> {
        Ok(self.tip())
    }

    async fn broadcast_transaction(&self, tx: Vec<u8>) -> SdkResult<String> {
        let tx: Transaction = bitcoin::consensus::deserialize(&tx)
            .map_err(|e| SdkError::generic(format!("bad transaction: {}", e)))?;
        let txid = tx.compute_txid();
        let mut state = self.state.lock().unwrap();
        state.broadcasts.push(tx.clone());
        state.txs.push(ChainTx { tx, height: None });
        Ok(txid.to_string())
    }
}

/// A swapper whose payments settle on a [`MockNodeAPI`]
pub struct MockSwapper {
    network: Network,
    node: Arc<MockNodeAPI>,
    completed: Mutex<Vec<String>>,
}

impl SendSync for MockSwapper {}

impl MockSwapper {
    pub fn new(network: Network, node: Arc<MockNodeAPI>) -> Self {
        MockSwapper { network, node, completed: Mutex::new(vec![]) }
    }

    /// Invoices the swapper paid
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SwapperAPI for MockSwapper {
    async fn create_swap(
        &self,
        payment_hash: Vec<u8>,
        payer_pubkey: Vec<u8>,
        _node_id: String,
    ) -> SdkResult<SwapperResponse> {
        let secp_ctx = Secp256k1::new();
        let swapper_key = SecretKey::from_slice(&SWAPPER_KEY)?;
        let swapper_pubkey = PublicKey::from_secret_key(&secp_ctx, &swapper_key);
        let payer_pubkey = PublicKey::from_slice(&payer_pubkey)?;
        let script = create_submarine_swap_script(
            &payment_hash,
            &swapper_pubkey,
            &payer_pubkey,
            SWAP_LOCK_HEIGHT,
        );
        Ok(SwapperResponse {
            bitcoin_address: swap_address(&script, self.network),
            swapper_pubkey: swapper_pubkey.serialize().to_vec(),
            lock_height: SWAP_LOCK_HEIGHT,
            min_allowed_deposit: 1_000,
            max_allowed_deposit: 1_000_000,
        })
    }

    async fn complete_swap(&self, bolt11: String) -> SdkResult<()> {
        let invoice = parse_invoice(&bolt11)?;
        let amount_msat =
            invoice.amount_msat.ok_or_else(|| SdkError::invalid_input("zero amount invoice"))?;
        self.node.receive(&bolt11, amount_msat)?;
        self.completed.lock().unwrap().push(bolt11);
        Ok(())
    }
}

struct MockReverseSwap {
    lockup_address: String,
    onchain_amount: u64,
    status: ReverseSwapperStatus,
}

/// A reverse swapper that locks funds on a [`MockChainService`] when told to
pub struct MockReverseSwapper {
    network: Network,
    chain: Arc<MockChainService>,
    clock: Arc<dyn Clock>,
    fees_hash: Mutex<String>,
    swaps: Mutex<OrderedMap<String, MockReverseSwap>>,
}

impl SendSync for MockReverseSwapper {}

impl MockReverseSwapper {
    pub fn new(network: Network, chain: Arc<MockChainService>, clock: Arc<dyn Clock>) -> Self {
        MockReverseSwapper {
            network,
            chain,
            clock,
            fees_hash: Mutex::new("hash-1".to_string()),
            swaps: Mutex::new(OrderedMap::new()),
        }
    }

    fn pair_info(&self) -> ReverseSwapPairInfo {
        ReverseSwapPairInfo {
            fees_hash: self.fees_hash.lock().unwrap().clone(),
            min: 50_000,
            max: 5_000_000,
            fees_percentage: 0.5,
            fees_lockup: 300,
            fees_claim: 200,
        }
    }

    /// Replace the current fee quote
    pub fn set_fees_hash(&self, fees_hash: &str) {
        *self.fees_hash.lock().unwrap() = fees_hash.to_string();
    }

    pub fn set_status(&self, id: &str, status: ReverseSwapperStatus) {
        self.swaps.lock().unwrap().get_mut(id).unwrap().status = status;
    }

    /// Lock the on-chain amount of swap `id`, in a block if `confirmed`
    pub fn lockup(&self, id: &str, confirmed: bool) -> Txid {
        let (address, amount) = {
            let swaps = self.swaps.lock().unwrap();
            let swap = swaps.get(id).unwrap();
            (swap.lockup_address.clone(), swap.onchain_amount)
        };
        let height = if confirmed { Some(self.chain.tip()) } else { None };
        let txid = self.chain.fund_address(&address, amount, height);
        let status = if confirmed {
            ReverseSwapperStatus::LockupConfirmed
        } else {
            ReverseSwapperStatus::LockupMempool
        };
        self.set_status(id, status);
        txid
    }
}

// The largest on-chain amount whose lightning amount fits `invoice_amount_sat`
fn onchain_amount_for(pair: &ReverseSwapPairInfo, invoice_amount_sat: u64) -> u64 {
    let mut amount = invoice_amount_sat.saturating_sub(pair.fees_lockup);
    while amount > 0 && amount + pair.service_fees(amount) > invoice_amount_sat {
        amount -= 1;
    }
    amount
}

#[async_trait]
impl ReverseSwapperAPI for MockReverseSwapper {
    async fn fetch_pair_info(&self) -> SdkResult<ReverseSwapPairInfo> {
        Ok(self.pair_info())
    }

    async fn create_reverse_swap(
        &self,
        invoice_amount_sat: u64,
        preimage_hash_hex: String,
        claim_pubkey_hex: String,
        pair_hash: String,
        _routing_node: String,
    ) -> SdkResult<CreateReverseSwapResponse> {
        let pair = self.pair_info();
        if pair.fees_hash != pair_hash {
            return Err(SdkError::generic(format!("unknown pair hash {}", pair_hash)));
        }
        let payment_hash: [u8; 32] = hex::decode(&preimage_hash_hex)
            .ok()
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| SdkError::invalid_input("preimage hash"))?;
        let claim_pubkey = PublicKey::from_str(&claim_pubkey_hex)?;
        let refund_key = SecretKey::from_slice(&REVERSE_SWAPPER_REFUND_KEY)?;
        let refund_pubkey = PublicKey::from_secret_key(&Secp256k1::new(), &refund_key);
        let timeout_block_height = self.chain.tip() + REVERSE_SWAP_TIMEOUT_BLOCKS;
        let script = create_reverse_swap_script(
            &payment_hash,
            &claim_pubkey,
            &refund_pubkey,
            timeout_block_height,
        );
        let lockup_address = Address::p2wsh(&script, self.network).to_string();
        let invoice_key = SecretKey::from_slice(&REVERSE_SWAPPER_INVOICE_KEY)?;
        let invoice = sign_invoice(
            self.network,
            Some(invoice_amount_sat * 1000),
            payment_hash,
            InvoiceDescription::Direct("Send to BTC address".into()),
            self.clock.now(),
            &invoice_key,
        );
        let onchain_amount = onchain_amount_for(&pair, invoice_amount_sat);

        let mut swaps = self.swaps.lock().unwrap();
        let id = format!("rs-{}", swaps.len() + 1);
        swaps.insert(
            id.clone(),
            MockReverseSwap {
                lockup_address: lockup_address.clone(),
                onchain_amount,
                status: ReverseSwapperStatus::Created,
            },
        );
        Ok(CreateReverseSwapResponse {
            id,
            invoice,
            redeem_script: hex::encode(script.as_bytes()),
            lockup_address,
            timeout_block_height,
            onchain_amount,
        })
    }

    async fn get_status(&self, id: String) -> SdkResult<ReverseSwapperStatus> {
        self.swaps
            .lock()
            .unwrap()
            .get(&id)
            .map(|s| s.status)
            .ok_or_else(|| SdkError::generic(format!("unknown reverse swap {}", id)))
    }
}

pub struct MockFiatAPI;

impl SendSync for MockFiatAPI {}

#[async_trait]
impl FiatAPI for MockFiatAPI {
    async fn list_fiat_currencies(&self) -> SdkResult<Vec<FiatCurrency>> {
        let currency = |id: &str, name: &str, symbol: &str| FiatCurrency {
            id: id.to_string(),
            name: name.to_string(),
            fraction_size: 2,
            symbol: Some(symbol.to_string()),
        };
        Ok(vec![
            currency("USD", "United States Dollar", "$"),
            currency("EUR", "Euro", "€"),
            currency("CHF", "Swiss Franc", "CHF"),
        ])
    }

    async fn fetch_fiat_rates(&self) -> SdkResult<Vec<Rate>> {
        Ok(vec![
            Rate { coin: "USD".into(), value: 60_000.0 },
            Rate { coin: "EUR".into(), value: 55_000.0 },
        ])
    }
}

/// Canned HTTP responses, matched by the longest URL prefix
pub struct MockRestClient {
    responses: Mutex<Vec<(String, u16, String)>>,
    calls: Mutex<Vec<String>>,
}

impl SendSync for MockRestClient {}

impl MockRestClient {
    pub fn new() -> Self {
        MockRestClient { responses: Mutex::new(vec![]), calls: Mutex::new(vec![]) }
    }

    pub fn add_response(&self, url_prefix: &str, status: u16, body: &str) {
        self.responses.lock().unwrap().push((url_prefix.to_string(), status, body.to_string()));
    }

    /// Requested URLs, oldest first
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(&self, url: &str) -> (u16, String) {
        self.calls.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .iter()
            .filter(|(prefix, _, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _, _)| prefix.len())
            .map(|(_, status, body)| (*status, body.clone()))
            .unwrap_or((404, "not found".to_string()))
    }
}

#[async_trait]
impl RestClient for MockRestClient {
    async fn get(&self, url: &str) -> SdkResult<(u16, String)> {
        Ok(self.respond(url))
    }

    async fn post(&self, url: &str, _body: String) -> SdkResult<(u16, String)> {
        Ok(self.respond(url))
    }
}

/// A remote backup store in memory
pub struct MemoryBackupTransport {
    current: Mutex<Option<(u64, Vec<u8>)>>,
    fail: AtomicBool,
}

impl SendSync for MemoryBackupTransport {}

impl MemoryBackupTransport {
    pub fn new() -> Self {
        MemoryBackupTransport { current: Mutex::new(None), fail: AtomicBool::new(false) }
    }

    /// Make every call fail until reset
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Overwrite the stored blob
    pub fn put(&self, version: u64, data: Vec<u8>) {
        *self.current.lock().unwrap() = Some((version, data));
    }

    fn check(&self) -> SdkResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(SdkError::BackupFailed("remote unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BackupTransport for MemoryBackupTransport {
    async fn pull(&self) -> SdkResult<Option<(u64, Vec<u8>)>> {
        self.check()?;
        Ok(self.current.lock().unwrap().clone())
    }

    async fn push(&self, expected_version: Option<u64>, data: Vec<u8>) -> SdkResult<u64> {
        self.check()?;
        let mut current = self.current.lock().unwrap();
        let version = current.as_ref().map(|(v, _)| *v);
        if version != expected_version {
            return Err(SdkError::BackupFailed(format!(
                "remote at version {:?}, expected {:?}",
                version, expected_version
            )));
        }
        let next = version.unwrap_or(0) + 1;
        *current = Some((next, data));
        Ok(next)
    }
}

/// Mock services wired for one node, on regtest
pub struct TestEnv {
    pub node: Arc<MockNodeAPI>,
    pub lsp: Arc<MockLspAPI>,
    pub swapper: Arc<MockSwapper>,
    pub reverse_swapper: Arc<MockReverseSwapper>,
    pub chain: Arc<MockChainService>,
    pub fiat: Arc<MockFiatAPI>,
    pub backup: Arc<MemoryBackupTransport>,
    pub rest: Arc<MockRestClient>,
    pub persister: Arc<MemoryPersister>,
    pub clock: Arc<ManualClock>,
    pub working_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let network = Network::Regtest;
        let clock = Arc::new(ManualClock::new(Duration::from_secs(TEST_START_TIME_SECS)));
        let keys = KeyMaterial::new(derive_seed(TEST_MNEMONIC).unwrap(), network);
        let node = Arc::new(MockNodeAPI::new(&keys.node_secret_key().unwrap(), clock.clone()));
        let chain = Arc::new(MockChainService::new(network));
        let working_dir = std::env::temp_dir()
            .join(format!("lnsdk-test-{}", hex::encode(random_bytes::<8>())));
        TestEnv {
            lsp: Arc::new(MockLspAPI::new()),
            swapper: Arc::new(MockSwapper::new(network, Arc::clone(&node))),
            reverse_swapper: Arc::new(MockReverseSwapper::new(
                network,
                Arc::clone(&chain),
                clock.clone(),
            )),
            node,
            chain,
            fiat: Arc::new(MockFiatAPI),
            backup: Arc::new(MemoryBackupTransport::new()),
            rest: Arc::new(MockRestClient::new()),
            persister: Arc::new(MemoryPersister::new()),
            clock,
            working_dir,
        }
    }

    /// A regtest config in this environment's working directory, without background work
    pub fn config(&self) -> NodeConfig {
        let mut config = ConfigResolver::build_config(
            EnvironmentType::Regtest,
            None,
            NodeBackend::Greenlight { config: Default::default() },
            &self.working_dir,
        )
        .unwrap();
        config.sync_interval_secs = 3600;
        config.auto_backup = false;
        config
    }

    pub fn seed(&self) -> Seed {
        derive_seed(TEST_MNEMONIC).unwrap()
    }

    pub fn services(&self) -> SessionServices {
        SessionServices {
            node_api: self.node.clone(),
            lsp_api: self.lsp.clone(),
            swapper_api: self.swapper.clone(),
            reverse_swapper_api: self.reverse_swapper.clone(),
            chain_service: self.chain.clone(),
            fiat_api: self.fiat.clone(),
            backup_transport: self.backup.clone(),
            rest_client: self.rest.clone(),
            persister: self.persister.clone(),
            clock: self.clock.clone(),
        }
    }

    /// An invoice from another node, created now
    pub fn external_invoice(&self, amount_msat: Option<u64>, network: Network) -> String {
        make_external_invoice(
            network,
            amount_msat,
            random_bytes::<32>(),
            InvoiceDescription::Direct("external".into()),
            self.clock.now(),
        )
    }

    /// An invoice from another node committing to `description_hash`
    pub fn external_invoice_with_hash(
        &self,
        amount_msat: Option<u64>,
        description_hash: [u8; 32],
    ) -> String {
        make_external_invoice(
            Network::Regtest,
            amount_msat,
            random_bytes::<32>(),
            InvoiceDescription::Hash(description_hash),
            self.clock.now(),
        )
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.working_dir);
    }
}
