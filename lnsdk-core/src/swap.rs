use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::{ripemd160, Hash};
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CSV, OP_DROP, OP_ELSE, OP_ENDIF, OP_EQUAL, OP_HASH160, OP_IF,
};
use bitcoin::script::Builder;
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::{Address, Network, ScriptBuf, Sequence};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::chain::{address_utxos, Utxo};
use crate::error::{SdkError, SdkResult};
use crate::events::SdkEvent;
use crate::invoice::{parse_invoice, InvoiceDescription};
use crate::model::{PaymentStatus, PaymentType, SwapInfo, SwapStatus};
use crate::payments::{sat_to_msat, ReceiveRequest};
use crate::session::Session;
use crate::util::crypto_utils::{random_bytes, sha256};
use crate::util::transaction_utils::{build_script_spend, ScriptSpend};
use crate::SendSync;

/// Description of invoices that redeem a swap
pub const SWAP_INVOICE_DESCRIPTION: &str = "Bitcoin Transfer";

/// Swapper answer to a new swap
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapperResponse {
    /// Deposit address
    pub bitcoin_address: String,
    /// Swapper claim key
    pub swapper_pubkey: Vec<u8>,
    /// Relative lock of the refund branch, in blocks
    pub lock_height: u32,
    /// Smallest deposit the swapper accepts, in satoshis
    pub min_allowed_deposit: u64,
    /// Largest deposit the swapper accepts, in satoshis
    pub max_allowed_deposit: u64,
}

/// Submarine swap service
#[async_trait]
pub trait SwapperAPI: SendSync {
    /// Create a swap locked to `payment_hash`, refundable to `payer_pubkey`
    async fn create_swap(
        &self,
        payment_hash: Vec<u8>,
        payer_pubkey: Vec<u8>,
        node_id: String,
    ) -> SdkResult<SwapperResponse>;
    /// Ask the swapper to pay `bolt11` for a confirmed deposit
    async fn complete_swap(&self, bolt11: String) -> SdkResult<()>;
}

/// Witness script of a submarine swap deposit.
///
/// The swapper claims with the preimage of `payment_hash`; the payer can refund after
/// `lock_height` blocks.
pub fn create_submarine_swap_script(
    payment_hash: &[u8],
    swapper_pubkey: &PublicKey,
    payer_pubkey: &PublicKey,
    lock_height: u32,
) -> ScriptBuf {
    let hash160 = ripemd160::Hash::hash(payment_hash);
    Builder::new()
        .push_opcode(OP_HASH160)
        .push_slice(hash160.to_byte_array())
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_key(&bitcoin::PublicKey::new(*swapper_pubkey))
        .push_opcode(OP_ELSE)
        .push_int(lock_height as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_key(&bitcoin::PublicKey::new(*payer_pubkey))
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

fn pubkey_from_slice(bytes: &[u8], what: &str) -> SdkResult<PublicKey> {
    PublicKey::from_slice(bytes).map_err(|e| SdkError::generic(format!("{}: {}", what, e)))
}

/// Status of a swap, given its current deposit and payment data
pub(crate) fn compute_swap_status(swap: &SwapInfo, tip: u32, safety_blocks: u32) -> SwapStatus {
    let funded = swap.confirmed_sats + swap.unconfirmed_sats > 0;
    if swap.paid_msat > 0 {
        return SwapStatus::Redeemed;
    }
    if !swap.refund_tx_ids.is_empty() && !funded {
        return SwapStatus::Completed;
    }
    if swap.confirmed_sats > 0 {
        let confirmed_at = swap.confirmed_at.unwrap_or(tip);
        let refundable_at = confirmed_at
            .saturating_add(swap.lock_height)
            .saturating_add(safety_blocks);
        if tip >= refundable_at {
            SwapStatus::Refundable
        } else {
            SwapStatus::Redeemable
        }
    } else if swap.unconfirmed_sats > 0 {
        SwapStatus::WaitingConfirmation
    } else {
        SwapStatus::Initial
    }
}

fn apply_deposits(swap: &mut SwapInfo, utxos: &[Utxo]) {
    let confirmed: Vec<&Utxo> = utxos.iter().filter(|u| u.block_height.is_some()).collect();
    let unconfirmed: Vec<&Utxo> = utxos.iter().filter(|u| u.block_height.is_none()).collect();
    swap.confirmed_sats = confirmed.iter().map(|u| u.value).sum();
    swap.unconfirmed_sats = unconfirmed.iter().map(|u| u.value).sum();
    swap.confirmed_at = confirmed.iter().filter_map(|u| u.block_height).min();
    swap.confirmed_tx_ids = confirmed.iter().map(|u| u.outpoint.txid.to_string()).collect();
    swap.unconfirmed_tx_ids = unconfirmed.iter().map(|u| u.outpoint.txid.to_string()).collect();
    swap.confirmed_tx_ids.dedup();
    swap.unconfirmed_tx_ids.dedup();
}

impl Session {
    /// Create a deposit address for an on-chain to lightning swap
    pub async fn receive_onchain(&self) -> SdkResult<SwapInfo> {
        let _guard = self.lock_op().await?;
        let persister = &self.services.persister;
        if let Some(existing) =
            persister.list_swaps()?.into_iter().find(|s| s.status.is_in_progress())
        {
            return Err(SdkError::SwapInProgress(existing.bitcoin_address));
        }
        let node_state = self.node_state()?;
        let lsp = self.active_lsp().await?;

        let secp_ctx = self.keys.secp_ctx();
        let preimage = random_bytes::<32>();
        let payment_hash = sha256(&preimage);
        let refund_key = SecretKey::from_slice(&random_bytes::<32>())?;
        let refund_pubkey = PublicKey::from_secret_key(secp_ctx, &refund_key);

        let response = self
            .net(
                "create swap",
                self.services.swapper_api.create_swap(
                    payment_hash.to_vec(),
                    refund_pubkey.serialize().to_vec(),
                    self.node_id().to_string(),
                ),
            )
            .await?;
        let swapper_pubkey = pubkey_from_slice(&response.swapper_pubkey, "swapper key")?;
        let script = create_submarine_swap_script(
            &payment_hash,
            &swapper_pubkey,
            &refund_pubkey,
            response.lock_height,
        );
        let address = Address::p2wsh(&script, self.config.network).to_string();
        if address != response.bitcoin_address {
            return Err(SdkError::generic(format!(
                "swapper address {} does not match script address {}",
                response.bitcoin_address, address
            )));
        }

        // without an LSP, a deposit must fit the existing inbound liquidity
        let max_allowed_deposit = match lsp {
            Some(_) => response.max_allowed_deposit,
            None => response.max_allowed_deposit.min(node_state.max_receivable_msat / 1000),
        };
        if max_allowed_deposit < response.min_allowed_deposit {
            return Err(SdkError::SwapLimitExceeded(format!(
                "can receive at most {} sat, swapper minimum is {} sat",
                max_allowed_deposit, response.min_allowed_deposit
            )));
        }

        let swap = SwapInfo {
            bitcoin_address: address,
            created_at: self.services.clock.now_secs(),
            lock_height: response.lock_height,
            payment_hash: payment_hash.to_vec(),
            preimage: preimage.to_vec(),
            private_key: refund_key.secret_bytes().to_vec(),
            public_key: refund_pubkey.serialize().to_vec(),
            swapper_public_key: response.swapper_pubkey,
            script: script.to_bytes(),
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
            min_allowed_deposit: response.min_allowed_deposit,
            max_allowed_deposit,
            last_redeem_error: None,
        };
        persister.insert_or_update_swap(&swap)?;
        self.events.emit(SdkEvent::SwapUpdated { details: swap.clone() });
        self.mark_backup_pending();
        info!("created swap {}", swap.bitcoin_address);
        Ok(swap)
    }

    /// The most recent swap still waiting for funds or redemption
    pub fn in_progress_swap(&self) -> SdkResult<Option<SwapInfo>> {
        self.ensure_connected()?;
        Ok(self
            .services
            .persister
            .list_swaps()?
            .into_iter()
            .filter(|s| s.status.is_in_progress())
            .max_by_key(|s| s.created_at))
    }

    /// Swaps whose lock expired with funds still on the deposit address
    pub fn list_refundables(&self) -> SdkResult<Vec<SwapInfo>> {
        self.ensure_connected()?;
        Ok(self
            .services
            .persister
            .list_swaps()?
            .into_iter()
            .filter(|s| s.status == SwapStatus::Refundable)
            .collect())
    }

    /// Refund an expired swap deposit to `to_address`, returning the refund txid
    pub async fn refund(
        &self,
        swap_address: &str,
        to_address: &str,
        sat_per_vbyte: u32,
    ) -> SdkResult<String> {
        let _guard = self.lock_op().await?;
        let persister = &self.services.persister;
        let mut swap = persister
            .get_swap(swap_address)?
            .ok_or_else(|| SdkError::invalid_input(format!("unknown swap {}", swap_address)))?;
        if swap.status != SwapStatus::Refundable {
            return Err(SdkError::SwapNotRefundable(format!(
                "swap {} is {:?}",
                swap_address, swap.status
            )));
        }
        let destination = self.parse_address(to_address)?;
        if sat_per_vbyte == 0 {
            return Err(SdkError::invalid_input("fee rate must be positive"));
        }

        let txs = self
            .net(
                "swap transactions",
                self.services.chain_service.address_transactions(swap_address.to_string()),
            )
            .await?;
        let utxos: Vec<Utxo> = address_utxos(swap_address, &txs)?
            .into_iter()
            .filter(|u| u.block_height.is_some())
            .collect();
        if utxos.is_empty() {
            return Err(SdkError::SwapNotRefundable(format!("no funds on {}", swap_address)));
        }
        let lock_height = u16::try_from(swap.lock_height)
            .map_err(|_| SdkError::generic(format!("lock height {}", swap.lock_height)))?;
        let key = SecretKey::from_slice(&swap.private_key)?;
        let script = ScriptBuf::from_bytes(swap.script.clone());
        let spend = ScriptSpend {
            witness_script: &script,
            key: &key,
            middle: vec![],
            sequence: Sequence::from_height(lock_height),
            lock_time: LockTime::ZERO,
        };
        let tx = build_script_spend(
            &spend,
            &utxos,
            destination.script_pubkey(),
            sat_per_vbyte,
            self.keys.secp_ctx(),
        )?;
        let txid = self
            .net(
                "broadcast refund",
                self.services
                    .chain_service
                    .broadcast_transaction(bitcoin::consensus::serialize(&tx)),
            )
            .await?;

        swap.refund_tx_ids.push(txid.clone());
        swap.refund_address = Some(destination.to_string());
        persister.insert_or_update_swap(&swap)?;
        self.events.emit(SdkEvent::SwapUpdated { details: swap });
        self.mark_backup_pending();
        info!("refunded swap {} in {}", swap_address, txid);
        Ok(txid)
    }

    /// Update deposits and status of open swaps, redeeming confirmed deposits
    pub(crate) async fn refresh_swaps_locked(&self) -> SdkResult<()> {
        let persister = &self.services.persister;
        let open: Vec<SwapInfo> = persister
            .list_swaps()?
            .into_iter()
            .filter(|s| !matches!(s.status, SwapStatus::Redeemed | SwapStatus::Completed))
            .collect();
        if open.is_empty() {
            return Ok(());
        }
        let tip = self.net("chain tip", self.services.chain_service.current_tip()).await?;
        for original in open {
            let mut swap = original.clone();
            let address = swap.bitcoin_address.clone();
            let txs = self
                .net(
                    "swap transactions",
                    self.services.chain_service.address_transactions(address.clone()),
                )
                .await?;
            let utxos = address_utxos(&address, &txs)?;
            apply_deposits(&mut swap, &utxos);

            let payment_id = hex::encode(&swap.payment_hash);
            if let Some(payment) = persister.get_payment(&payment_id)? {
                if payment.payment_type == PaymentType::Received
                    && payment.status == PaymentStatus::Complete
                {
                    swap.paid_msat = payment.amount_msat;
                    if payment.swap_address.is_none() {
                        let mut payment = payment;
                        payment.swap_address = Some(address.clone());
                        persister.insert_or_update_payments(&[payment])?;
                    }
                }
            }
            swap.status =
                compute_swap_status(&swap, tip, self.config.swap_refund_safety_blocks);

            if swap.status == SwapStatus::Redeemable {
                match self.redeem_swap(&mut swap).await {
                    Ok(()) => swap.last_redeem_error = None,
                    Err(e) => {
                        warn!("redeem of swap {} failed: {}", address, e);
                        swap.last_redeem_error = Some(e.to_string());
                    }
                }
            }

            if swap != original {
                debug!("swap {} is now {:?}", address, swap.status);
                persister.insert_or_update_swap(&swap)?;
                self.events.emit(SdkEvent::SwapUpdated { details: swap });
                self.mark_backup_pending();
            }
        }
        Ok(())
    }

    async fn redeem_swap(&self, swap: &mut SwapInfo) -> SdkResult<()> {
        if swap.confirmed_sats < swap.min_allowed_deposit
            || swap.confirmed_sats > swap.max_allowed_deposit
        {
            return Err(SdkError::AmountOutOfRange(format!(
                "deposit of {} sat outside {}..={}",
                swap.confirmed_sats, swap.min_allowed_deposit, swap.max_allowed_deposit
            )));
        }
        let amount_msat = sat_to_msat(swap.confirmed_sats)?;
        let now = self.services.clock.now_secs();
        let reusable = swap.bolt11.as_deref().and_then(|b| parse_invoice(b).ok()).filter(|i| {
            i.amount_msat == Some(amount_msat) && !i.is_expired_at(now)
        });
        let bolt11 = match reusable {
            Some(invoice) => invoice.bolt11,
            None => {
                let preimage: [u8; 32] = swap
                    .preimage
                    .as_slice()
                    .try_into()
                    .map_err(|_| SdkError::generic("bad swap preimage"))?;
                let (invoice, _) = self
                    .create_receive_invoice(ReceiveRequest {
                        amount_msat,
                        description: InvoiceDescription::Direct(
                            SWAP_INVOICE_DESCRIPTION.to_string(),
                        ),
                        preimage: Some(preimage),
                    })
                    .await?;
                swap.bolt11 = Some(invoice.bolt11.clone());
                invoice.bolt11
            }
        };
        self.net("complete swap", self.services.swapper_api.complete_swap(bolt11)).await?;
        info!("swap {} redeem requested", swap.bitcoin_address);
        Ok(())
    }
}

/// Address of a swap script on `network`
pub fn swap_address(script: &ScriptBuf, network: Network) -> String {
    Address::p2wsh(script, network).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::session::NodeSession;
    use crate::util::test_utils::*;

    fn swap_with(confirmed: u64, unconfirmed: u64, confirmed_at: Option<u32>) -> SwapInfo {
        let mut swap = make_test_swap("addr");
        swap.lock_height = 144;
        swap.confirmed_sats = confirmed;
        swap.unconfirmed_sats = unconfirmed;
        swap.confirmed_at = confirmed_at;
        swap
    }

    #[test]
    fn status_test() {
        assert_eq!(compute_swap_status(&swap_with(0, 0, None), 100, 0), SwapStatus::Initial);
        assert_eq!(
            compute_swap_status(&swap_with(0, 500, None), 100, 0),
            SwapStatus::WaitingConfirmation
        );
        assert_eq!(
            compute_swap_status(&swap_with(500, 0, Some(100)), 243, 0),
            SwapStatus::Redeemable
        );
        assert_eq!(
            compute_swap_status(&swap_with(500, 0, Some(100)), 244, 0),
            SwapStatus::Refundable
        );
        assert_eq!(
            compute_swap_status(&swap_with(500, 0, Some(100)), 244, 6),
            SwapStatus::Redeemable
        );
        let mut paid = swap_with(500, 0, Some(100));
        paid.paid_msat = 500_000;
        assert_eq!(compute_swap_status(&paid, 300, 0), SwapStatus::Redeemed);
        let mut refunded = swap_with(0, 0, Some(100));
        refunded.refund_tx_ids.push("aa".into());
        assert_eq!(compute_swap_status(&refunded, 300, 0), SwapStatus::Completed);
    }

    #[test]
    fn script_test() {
        let swapper = test_pubkey(1).parse::<PublicKey>().unwrap();
        let payer = test_pubkey(2).parse::<PublicKey>().unwrap();
        let a = create_submarine_swap_script(&[7; 32], &swapper, &payer, 144);
        let b = create_submarine_swap_script(&[7; 32], &swapper, &payer, 145);
        assert_ne!(a, b);
        assert!(a.to_bytes().windows(33).any(|w| w == swapper.serialize()));
        assert!(swap_address(&a, Network::Regtest).starts_with("bcrt1q"));
    }

    #[tokio::test]
    async fn receive_onchain_limits_test() {
        let env = TestEnv::new();
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        // no lsp and no inbound liquidity
        let err = session.receive_onchain().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SwapLimitExceeded);
        assert_eq!(session.in_progress_swap().unwrap(), None);

        env.node.set_balances(0, 0, 50_000_000);
        session.sync().await.unwrap();
        let swap = session.receive_onchain().await.unwrap();
        assert_eq!(swap.max_allowed_deposit, 50_000);
        assert_eq!(swap.status, SwapStatus::Initial);
        assert_eq!(session.in_progress_swap().unwrap().unwrap().bitcoin_address, swap.bitcoin_address);

        let err = session.receive_onchain().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SwapInProgress);
    }

    #[tokio::test]
    async fn refund_test() {
        let env = TestEnv::new();
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        session.connect_lsp(TEST_LSP_ID).await.unwrap();
        let swap = session.receive_onchain().await.unwrap();

        let err = session.refund(&swap.bitcoin_address, TEST_REGTEST_ADDRESS, 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SwapNotRefundable);
        assert!(env.chain.broadcasts().is_empty());

        // a deposit larger than the swapper accepts is never redeemed
        env.chain.fund_address(&swap.bitcoin_address, 5_000_000, Some(env.chain.tip()));
        session.sync().await.unwrap();
        let current = session.in_progress_swap().unwrap().unwrap();
        assert_eq!(current.status, SwapStatus::Redeemable);
        assert!(current.last_redeem_error.is_some());
        assert!(session.list_refundables().unwrap().is_empty());

        env.chain.mine(swap.lock_height);
        session.sync().await.unwrap();
        let refundables = session.list_refundables().unwrap();
        assert_eq!(refundables.len(), 1);
        assert_eq!(session.in_progress_swap().unwrap(), None);

        let txid = session.refund(&swap.bitcoin_address, TEST_REGTEST_ADDRESS, 5).await.unwrap();
        let broadcasts = env.chain.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].compute_txid().to_string(), txid);
        assert_eq!(
            broadcasts[0].input[0].sequence,
            Sequence::from_height(swap.lock_height as u16)
        );

        session.sync().await.unwrap();
        let done = session.services.persister.get_swap(&swap.bitcoin_address).unwrap().unwrap();
        assert_eq!(done.status, SwapStatus::Completed);
        assert_eq!(done.refund_tx_ids, vec![txid]);
        assert_eq!(done.refund_address.as_deref(), Some(TEST_REGTEST_ADDRESS));
    }
}
