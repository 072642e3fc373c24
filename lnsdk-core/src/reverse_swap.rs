use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::{ripemd160, Hash};
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CLTV, OP_DROP, OP_ELSE, OP_ENDIF, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160, OP_IF,
    OP_SIZE,
};
use bitcoin::script::{Builder, Instruction};
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::{Address, Script, ScriptBuf, Sequence};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::chain::address_utxos;
use crate::error::{SdkError, SdkResult};
use crate::events::{EventBus, SdkEvent};
use crate::invoice::parse_invoice;
use crate::model::{
    Payment, PaymentStatus, PaymentType, ReverseSwapInfo, ReverseSwapPairInfo, ReverseSwapStatus,
};
use crate::node_api::SendPaymentRequest;
use crate::payments::sat_to_msat;
use crate::persist::Persist;
use crate::session::Session;
use crate::util::crypto_utils::{random_bytes, sha256};
use crate::util::transaction_utils::{build_script_spend, ScriptSpend};
use crate::util::with_timeout;
use crate::{Arc, SendSync};

/// Swapper answer to a new reverse swap
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReverseSwapResponse {
    /// Swapper assigned id
    pub id: String,
    /// Hold invoice to pay
    pub invoice: String,
    /// Lockup witness script, hex
    pub redeem_script: String,
    /// Lockup address
    pub lockup_address: String,
    /// Absolute height after which the swapper can reclaim the lockup
    pub timeout_block_height: u32,
    /// Amount the swapper locks, in satoshis
    pub onchain_amount: u64,
}

/// Reverse swap status as reported by the swapper
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseSwapperStatus {
    /// Waiting for the hold invoice payment
    Created,
    /// Lockup transaction in the mempool
    LockupMempool,
    /// Lockup transaction confirmed
    LockupConfirmed,
    /// The swapper settled the hold invoice
    InvoiceSettled,
    /// The hold invoice expired
    Expired,
    /// The swapper gave up
    Failed,
    /// The swapper reclaimed the lockup
    Refunded,
}

/// Reverse swap service
#[async_trait]
pub trait ReverseSwapperAPI: SendSync {
    /// Current fee schedule
    async fn fetch_pair_info(&self) -> SdkResult<ReverseSwapPairInfo>;
    /// Create a reverse swap
    async fn create_reverse_swap(
        &self,
        invoice_amount_sat: u64,
        preimage_hash_hex: String,
        claim_pubkey_hex: String,
        pair_hash: String,
        routing_node: String,
    ) -> SdkResult<CreateReverseSwapResponse>;
    /// Swapper view of a reverse swap
    async fn get_status(&self, id: String) -> SdkResult<ReverseSwapperStatus>;
}

/// Witness script of a reverse swap lockup.
///
/// We claim with the preimage; the swapper can reclaim after `timeout_block_height`.
pub fn create_reverse_swap_script(
    payment_hash: &[u8],
    claim_pubkey: &PublicKey,
    refund_pubkey: &PublicKey,
    timeout_block_height: u32,
) -> ScriptBuf {
    let hash160 = ripemd160::Hash::hash(payment_hash);
    Builder::new()
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_HASH160)
        .push_slice(hash160.to_byte_array())
        .push_opcode(OP_EQUALVERIFY)
        .push_key(&bitcoin::PublicKey::new(*claim_pubkey))
        .push_opcode(OP_ELSE)
        .push_opcode(OP_DROP)
        .push_int(timeout_block_height as i64)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_key(&bitcoin::PublicKey::new(*refund_pubkey))
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

const REFUND_KEY_INSTRUCTION: usize = 13;

/// Check that a swapper supplied script locks to our hash and claim key
pub fn verify_reverse_swap_script(
    script: &Script,
    payment_hash: &[u8],
    claim_pubkey: &PublicKey,
    timeout_block_height: u32,
) -> SdkResult<()> {
    let mismatch = || SdkError::generic("unexpected lockup script");
    let refund_key = match script.instructions().nth(REFUND_KEY_INSTRUCTION) {
        Some(Ok(Instruction::PushBytes(bytes))) => {
            PublicKey::from_slice(bytes.as_bytes()).map_err(|_| mismatch())?
        }
        _ => return Err(mismatch()),
    };
    let expected =
        create_reverse_swap_script(payment_hash, claim_pubkey, &refund_key, timeout_block_height);
    if expected.as_script() != script {
        return Err(mismatch());
    }
    Ok(())
}

impl Session {
    /// Current reverse swap fee schedule, cached for the quote lifetime
    pub async fn fetch_reverse_swap_fees(&self) -> SdkResult<ReverseSwapPairInfo> {
        self.ensure_connected()?;
        self.current_pair_info().await
    }

    async fn current_pair_info(&self) -> SdkResult<ReverseSwapPairInfo> {
        let now = self.services.clock.now();
        let ttl = self.config.fee_quote_ttl();
        {
            let quote = self.fee_quote.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((fetched_at, pair)) = quote.as_ref() {
                if now.saturating_sub(*fetched_at) < ttl {
                    return Ok(pair.clone());
                }
            }
        }
        let pair = self
            .net("reverse swap fees", self.services.reverse_swapper_api.fetch_pair_info())
            .await?;
        debug!("fresh reverse swap quote {}", pair.fees_hash);
        *self.fee_quote.lock().unwrap_or_else(|e| e.into_inner()) = Some((now, pair.clone()));
        Ok(pair)
    }

    /// Send `amount_sat` on chain to `onchain_recipient_address` through a reverse swap.
    ///
    /// `pair_hash` must identify the current fee quote. The lightning payment is `amount_sat`
    /// plus service fees; the claim fee comes out of the on-chain amount.
    pub async fn send_onchain(
        &self,
        amount_sat: u64,
        onchain_recipient_address: &str,
        pair_hash: &str,
        sat_per_vbyte: u32,
    ) -> SdkResult<ReverseSwapInfo> {
        let _guard = self.lock_op().await?;
        let persister = &self.services.persister;
        let recipient = self.parse_address(onchain_recipient_address)?;
        if sat_per_vbyte == 0 {
            return Err(SdkError::invalid_input("fee rate must be positive"));
        }
        if let Some(existing) =
            persister.list_reverse_swaps()?.into_iter().find(|s| s.status.is_in_progress())
        {
            return Err(SdkError::SwapInProgress(existing.id));
        }

        let pair = self.current_pair_info().await?;
        if pair.fees_hash != pair_hash {
            return Err(SdkError::StaleFeeQuote(format!(
                "quote {} superseded by {}",
                pair_hash, pair.fees_hash
            )));
        }
        if amount_sat < pair.min || amount_sat > pair.max {
            return Err(SdkError::AmountOutOfRange(format!(
                "{} sat outside {}..={}",
                amount_sat, pair.min, pair.max
            )));
        }
        let out_of_range = || SdkError::AmountOutOfRange(format!("{} sat with fees", amount_sat));
        let invoice_amount_sat =
            amount_sat.checked_add(pair.service_fees(amount_sat)).ok_or_else(out_of_range)?;
        let invoice_amount_msat = sat_to_msat(invoice_amount_sat)?;
        let max_fee_msat = self.max_fee_msat(invoice_amount_msat);
        self.check_payable(invoice_amount_msat.checked_add(max_fee_msat).ok_or_else(out_of_range)?)?;

        let secp_ctx = self.keys.secp_ctx();
        let preimage = random_bytes::<32>();
        let payment_hash = sha256(&preimage);
        let claim_key = SecretKey::from_slice(&random_bytes::<32>())?;
        let claim_pubkey = PublicKey::from_secret_key(secp_ctx, &claim_key);

        let response = self
            .net(
                "create reverse swap",
                self.services.reverse_swapper_api.create_reverse_swap(
                    invoice_amount_sat,
                    hex::encode(payment_hash),
                    claim_pubkey.to_string(),
                    pair_hash.to_string(),
                    self.node_id().to_string(),
                ),
            )
            .await?;

        let redeem_script = ScriptBuf::from_bytes(
            hex::decode(&response.redeem_script)
                .map_err(|e| SdkError::generic(format!("lockup script: {}", e)))?,
        );
        verify_reverse_swap_script(
            &redeem_script,
            &payment_hash,
            &claim_pubkey,
            response.timeout_block_height,
        )?;
        let lockup_address = Address::p2wsh(&redeem_script, self.config.network).to_string();
        if lockup_address != response.lockup_address {
            return Err(SdkError::generic(format!(
                "lockup address {} does not match script address {}",
                response.lockup_address, lockup_address
            )));
        }
        let invoice = parse_invoice(&response.invoice)
            .map_err(|e| SdkError::InvoiceMismatch(e.to_string()))?;
        if invoice.payment_hash != hex::encode(payment_hash) {
            return Err(SdkError::InvoiceMismatch("hold invoice payment hash".into()));
        }
        if invoice.amount_msat != Some(invoice_amount_msat) {
            return Err(SdkError::InvoiceMismatch(format!(
                "hold invoice amount {:?}, expected {}",
                invoice.amount_msat, invoice_amount_msat
            )));
        }
        if response.onchain_amount != amount_sat {
            return Err(SdkError::generic(format!(
                "swapper locks {} sat, expected {}",
                response.onchain_amount, amount_sat
            )));
        }

        let now = self.services.clock.now_secs();
        let swap = ReverseSwapInfo {
            id: response.id,
            created_at: now,
            claim_pubkey: claim_pubkey.to_string(),
            claim_private_key: claim_key.secret_bytes().to_vec(),
            preimage: preimage.to_vec(),
            timeout_block_height: response.timeout_block_height,
            invoice: invoice.bolt11.clone(),
            invoice_amount_sat,
            redeem_script: redeem_script.to_bytes(),
            lockup_address,
            onchain_recipient_address: recipient.to_string(),
            onchain_amount_sat: amount_sat,
            sat_per_vbyte,
            lockup_txid: None,
            claim_txid: None,
            status: ReverseSwapStatus::Initial,
            error: None,
        };
        persister.insert_or_update_reverse_swap(&swap)?;
        persister.insert_or_update_payments(&[Payment {
            id: invoice.payment_hash.clone(),
            payment_type: PaymentType::Sent,
            payment_time: now,
            amount_msat: invoice_amount_msat,
            fee_msat: 0,
            status: PaymentStatus::Pending,
            error: None,
            description: invoice.description.clone(),
            destination_pubkey: invoice.payee_pubkey.clone(),
            bolt11: Some(invoice.bolt11.clone()),
            payment_preimage: None,
            keysend: false,
            lnurl_info: None,
            swap_address: None,
            reverse_swap_id: Some(swap.id.clone()),
        }])?;
        self.events.emit(SdkEvent::ReverseSwapUpdated { details: swap.clone() });
        self.mark_backup_pending();
        info!("created reverse swap {} for {} sat", swap.id, amount_sat);

        self.spawn_hold_invoice_payment(&swap, max_fee_msat);
        Ok(swap)
    }

    // The hold invoice only settles once we claim on chain, so it is paid outside the
    // operation lock. On timeout the swap is left to sync, which follows the swapper.
    fn spawn_hold_invoice_payment(&self, swap: &ReverseSwapInfo, max_fee_msat: u64) {
        let node_api = Arc::clone(&self.services.node_api);
        let persister = Arc::clone(&self.services.persister);
        let events = Arc::clone(&self.events);
        let op_lock = self.op_lock();
        let shutdown = self.shutdown_listener();
        let timeout = self.config.payment_timeout();
        let request =
            SendPaymentRequest { bolt11: swap.invoice.clone(), amount_msat: None, max_fee_msat };
        let swap_id = swap.id.clone();
        self.spawn_tracked(async move {
            let payment = node_api.send_payment(request);
            let result = match with_timeout(timeout, "hold invoice payment", payment).await {
                Err(e @ SdkError::NetworkTimeout(_)) => {
                    warn!("hold invoice of reverse swap {} not settled: {}", swap_id, e);
                    return;
                }
                result => result,
            };
            let _guard = op_lock.lock().await;
            if shutdown.is_triggered() {
                return;
            }
            if let Err(e) = record_hold_invoice_result(&*persister, &events, &swap_id, result) {
                warn!("storing hold invoice result of reverse swap {} failed: {}", swap_id, e);
            }
        });
    }

    /// Reverse swaps not yet claimed or cancelled
    pub fn in_progress_reverse_swaps(&self) -> SdkResult<Vec<ReverseSwapInfo>> {
        self.ensure_connected()?;
        let mut swaps: Vec<ReverseSwapInfo> = self
            .services
            .persister
            .list_reverse_swaps()?
            .into_iter()
            .filter(|s| s.status.is_in_progress())
            .collect();
        swaps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(swaps)
    }

    /// Follow swapper progress, claiming locked funds once the lockup confirms
    pub(crate) async fn refresh_reverse_swaps_locked(&self) -> SdkResult<()> {
        let persister = &self.services.persister;
        let open: Vec<ReverseSwapInfo> =
            persister.list_reverse_swaps()?.into_iter().filter(|s| !s.status.is_final()).collect();
        for original in open {
            let mut swap = original.clone();
            let status = self
                .net("reverse swap status", self.services.reverse_swapper_api.get_status(swap.id.clone()))
                .await?;
            let txs = self
                .net(
                    "lockup transactions",
                    self.services.chain_service.address_transactions(swap.lockup_address.clone()),
                )
                .await?;

            match status {
                ReverseSwapperStatus::Created => {}
                ReverseSwapperStatus::LockupMempool
                | ReverseSwapperStatus::LockupConfirmed
                | ReverseSwapperStatus::InvoiceSettled => {
                    if swap.status == ReverseSwapStatus::Initial {
                        swap.status = ReverseSwapStatus::InProgress;
                    }
                    if swap.claim_txid.is_none() {
                        if let Err(e) = self.claim_reverse_swap(&mut swap, &txs).await {
                            warn!("claim of reverse swap {} failed: {}", swap.id, e);
                            swap.error = Some(e.to_string());
                        }
                    }
                }
                ReverseSwapperStatus::Expired
                | ReverseSwapperStatus::Failed
                | ReverseSwapperStatus::Refunded => {
                    if swap.claim_txid.is_none() {
                        swap.status = ReverseSwapStatus::Cancelled;
                        swap.error = Some(format!("swapper reports {:?}", status));
                    }
                }
            }

            if let Some(claim_txid) = swap.claim_txid.as_ref() {
                let confirmed =
                    txs.iter().any(|tx| &tx.txid == claim_txid && tx.status.confirmed);
                swap.status = if confirmed {
                    ReverseSwapStatus::CompletedConfirmed
                } else {
                    ReverseSwapStatus::CompletedSeen
                };
            }

            if swap != original {
                debug!("reverse swap {} is now {:?}", swap.id, swap.status);
                persister.insert_or_update_reverse_swap(&swap)?;
                self.events.emit(SdkEvent::ReverseSwapUpdated { details: swap });
                self.mark_backup_pending();
            }
        }
        Ok(())
    }

    async fn claim_reverse_swap(
        &self,
        swap: &mut ReverseSwapInfo,
        txs: &[crate::chain::OnchainTx],
    ) -> SdkResult<()> {
        let utxos: Vec<_> = address_utxos(&swap.lockup_address, txs)?
            .into_iter()
            .filter(|u| u.block_height.is_some())
            .collect();
        let lockup = match utxos.first() {
            Some(utxo) => utxo.outpoint.txid.to_string(),
            None => return Ok(()),
        };
        swap.lockup_txid = Some(lockup);
        let locked: u64 = utxos.iter().map(|u| u.value).sum();
        if locked < swap.onchain_amount_sat {
            return Err(SdkError::generic(format!(
                "lockup of {} sat, expected {}",
                locked, swap.onchain_amount_sat
            )));
        }
        let recipient = self.parse_address(&swap.onchain_recipient_address)?;
        let key = SecretKey::from_slice(&swap.claim_private_key)?;
        let script = ScriptBuf::from_bytes(swap.redeem_script.clone());
        let spend = ScriptSpend {
            witness_script: &script,
            key: &key,
            middle: swap.preimage.clone(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            lock_time: LockTime::ZERO,
        };
        let tx = build_script_spend(
            &spend,
            &utxos,
            recipient.script_pubkey(),
            swap.sat_per_vbyte,
            self.keys.secp_ctx(),
        )?;
        let txid = self
            .net(
                "broadcast claim",
                self.services.chain_service.broadcast_transaction(bitcoin::consensus::serialize(&tx)),
            )
            .await?;
        info!("claimed reverse swap {} in {}", swap.id, txid);
        swap.claim_txid = Some(txid);
        swap.error = None;
        Ok(())
    }
}

fn record_hold_invoice_result(
    persister: &dyn Persist,
    events: &EventBus<SdkEvent>,
    swap_id: &str,
    result: SdkResult<Payment>,
) -> SdkResult<()> {
    match result {
        Ok(remote) => {
            let local = persister.get_payment(&remote.id)?;
            persister.insert_or_update_payments(&[Payment::merge_remote(local.as_ref(), remote)])?;
            info!("hold invoice of reverse swap {} paid", swap_id);
        }
        Err(e) => {
            warn!("hold invoice of reverse swap {} failed: {}", swap_id, e);
            match persister.get_reverse_swap(swap_id)? {
                Some(mut swap) if swap.claim_txid.is_none() => {
                    swap.status = ReverseSwapStatus::Cancelled;
                    swap.error = Some(e.to_string());
                    persister.insert_or_update_reverse_swap(&swap)?;
                    events.emit(SdkEvent::ReverseSwapUpdated { details: swap });
                }
                _ => {}
            }
        }
    }
    Ok(())
}
