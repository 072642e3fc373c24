use core::str::FromStr;

use bitcoin::secp256k1::PublicKey;
use log::{info, warn};
use tracing::instrument;

use crate::error::{SdkError, SdkResult};
use crate::events::SdkEvent;
use crate::invoice::{
    create_invoice, parse_invoice, InvoiceDescription, InvoiceRequest, LNInvoice,
    DEFAULT_INVOICE_EXPIRY_SECS,
};
use crate::model::{
    LnurlPaymentInfo, Payment, PaymentInformation, PaymentStatus, PaymentType, PaymentTypeFilter,
};
use crate::node_api::{RegisterInvoiceRequest, SendPaymentRequest};
use crate::session::Session;
use crate::util::crypto_utils::random_bytes;
use crate::util::with_timeout;

/// `amount_sat` in millisatoshis, or [`SdkError::AmountOutOfRange`] if it does not fit
pub(crate) fn sat_to_msat(amount_sat: u64) -> SdkResult<u64> {
    amount_sat
        .checked_mul(1000)
        .ok_or_else(|| SdkError::AmountOutOfRange(format!("{} sat", amount_sat)))
}

/// An invoice to create for an incoming payment
pub(crate) struct ReceiveRequest {
    pub amount_msat: u64,
    pub description: InvoiceDescription,
    pub preimage: Option<[u8; 32]>,
}

impl Session {
    /// Routing fee cap for `amount_msat`
    pub(crate) fn max_fee_msat(&self, amount_msat: u64) -> u64 {
        let proportional = (amount_msat as f64 * self.config.max_fee_percent / 100.0) as u64;
        proportional.max(self.config.exempt_fee_msat)
    }

    pub(crate) fn check_payable(&self, amount_msat: u64) -> SdkResult<()> {
        let node_state = self.node_state()?;
        if amount_msat > node_state.max_payable_msat {
            return Err(SdkError::InsufficientFunds(format!(
                "need {} msat, can pay {} msat",
                amount_msat, node_state.max_payable_msat
            )));
        }
        Ok(())
    }

    /// Pay a BOLT-11 invoice.
    ///
    /// `amount_sat` is required for zero-amount invoices and must be absent or equal to the
    /// invoice amount otherwise.
    #[instrument(skip(self, bolt11))]
    pub async fn send_payment(&self, bolt11: &str, amount_sat: Option<u64>) -> SdkResult<Payment> {
        let _guard = self.lock_op().await?;
        self.send_payment_locked(bolt11, amount_sat, None).await
    }

    pub(crate) async fn send_payment_locked(
        &self,
        bolt11: &str,
        amount_sat: Option<u64>,
        lnurl_info: Option<LnurlPaymentInfo>,
    ) -> SdkResult<Payment> {
        if amount_sat == Some(0) {
            return Err(SdkError::invalid_input("amount must be positive"));
        }
        let invoice = parse_invoice(bolt11)?;
        if invoice.network != self.config.network {
            return Err(SdkError::invalid_input(format!(
                "invoice is for {}, node runs on {}",
                invoice.network, self.config.network
            )));
        }
        if invoice.is_expired_at(self.services.clock.now_secs()) {
            return Err(SdkError::invalid_input("invoice expired"));
        }
        let requested_msat = amount_sat.map(sat_to_msat).transpose()?;
        let amount_msat = match (invoice.amount_msat, requested_msat) {
            (Some(fixed), Some(requested)) if fixed != requested => {
                return Err(SdkError::AmbiguousAmount(format!(
                    "invoice is for {} msat, caller asked for {} msat",
                    fixed, requested
                )))
            }
            (Some(fixed), _) => fixed,
            (None, Some(requested)) => requested,
            (None, None) => {
                return Err(SdkError::invalid_input("amount required for a zero-amount invoice"))
            }
        };
        if amount_msat == 0 {
            return Err(SdkError::invalid_input("amount must be positive"));
        }

        let persister = &self.services.persister;
        if let Some(existing) = persister.get_payment(&invoice.payment_hash)? {
            match existing.status {
                PaymentStatus::Complete => {
                    return Err(SdkError::invalid_input("invoice already paid"))
                }
                PaymentStatus::Pending if existing.payment_type == PaymentType::Sent => {
                    return Err(SdkError::invalid_input("payment already in flight"))
                }
                _ => {}
            }
        }
        self.check_payable(amount_msat)?;

        let pending = Payment {
            id: invoice.payment_hash.clone(),
            payment_type: PaymentType::Sent,
            payment_time: self.services.clock.now_secs(),
            amount_msat,
            fee_msat: 0,
            status: PaymentStatus::Pending,
            error: None,
            description: invoice.description.clone(),
            destination_pubkey: invoice.payee_pubkey.clone(),
            bolt11: Some(invoice.bolt11.clone()),
            payment_preimage: None,
            keysend: false,
            lnurl_info,
            swap_address: None,
            reverse_swap_id: None,
        };
        persister.insert_or_update_payments(&[pending.clone()])?;

        let request = SendPaymentRequest {
            bolt11: invoice.bolt11.clone(),
            amount_msat: if invoice.amount_msat.is_none() { Some(amount_msat) } else { None },
            max_fee_msat: self.max_fee_msat(amount_msat),
        };
        info!("paying {} msat to {}", amount_msat, invoice.payee_pubkey);
        let result = with_timeout(
            self.config.payment_timeout(),
            "send payment",
            self.services.node_api.send_payment(request),
        )
        .await;
        self.record_outgoing(pending, result, Some(invoice))
    }

    fn record_outgoing(
        &self,
        pending: Payment,
        result: SdkResult<Payment>,
        invoice: Option<LNInvoice>,
    ) -> SdkResult<Payment> {
        let persister = &self.services.persister;
        match result {
            Ok(remote) => {
                let payment = Payment::merge_remote(Some(&pending), remote);
                persister.insert_or_update_payments(&[payment.clone()])?;
                self.events.emit(SdkEvent::PaymentSucceed { details: payment.clone() });
                self.mark_backup_pending();
                Ok(payment)
            }
            // the node may still complete it, the next sync settles the record
            Err(e @ SdkError::NetworkTimeout(_)) => {
                warn!("payment {} still pending: {}", pending.id, e);
                Err(e)
            }
            Err(e) => {
                let failed = Payment {
                    status: PaymentStatus::Failed,
                    error: Some(e.to_string()),
                    ..pending
                };
                persister.insert_or_update_payments(&[failed.clone()])?;
                self.events.emit(SdkEvent::PaymentFailed {
                    error: e.to_string(),
                    node_id: Some(failed.destination_pubkey.clone()),
                    invoice,
                });
                self.mark_backup_pending();
                warn!("payment {} failed: {}", failed.id, e);
                Err(e)
            }
        }
    }

    /// Keysend `amount_sat` to `node_id`
    pub async fn send_spontaneous_payment(
        &self,
        node_id: &str,
        amount_sat: u64,
    ) -> SdkResult<Payment> {
        let _guard = self.lock_op().await?;
        PublicKey::from_str(node_id)
            .map_err(|e| SdkError::invalid_input(format!("node id {}: {}", node_id, e)))?;
        if amount_sat == 0 {
            return Err(SdkError::invalid_input("amount must be positive"));
        }
        let amount_msat = sat_to_msat(amount_sat)?;
        self.check_payable(amount_msat)?;
        let result = with_timeout(
            self.config.payment_timeout(),
            "keysend",
            self.services.node_api.send_spontaneous_payment(
                node_id.to_string(),
                amount_msat,
                self.max_fee_msat(amount_msat),
            ),
        )
        .await;
        match result {
            Ok(remote) => {
                let payment = Payment { keysend: true, ..remote };
                self.services.persister.insert_or_update_payments(&[payment.clone()])?;
                self.events.emit(SdkEvent::PaymentSucceed { details: payment.clone() });
                self.mark_backup_pending();
                Ok(payment)
            }
            Err(e @ SdkError::NetworkTimeout(_)) => {
                warn!("keysend to {} may still complete: {}", node_id, e);
                Err(e)
            }
            // the node never reports a hash for a failed keysend, so the record gets its own id
            Err(e) => self.record_outgoing(
                Payment {
                    id: hex::encode(random_bytes::<32>()),
                    payment_type: PaymentType::Sent,
                    payment_time: self.services.clock.now_secs(),
                    amount_msat,
                    fee_msat: 0,
                    status: PaymentStatus::Pending,
                    error: None,
                    description: None,
                    destination_pubkey: node_id.to_string(),
                    bolt11: None,
                    payment_preimage: None,
                    keysend: true,
                    lnurl_info: None,
                    swap_address: None,
                    reverse_swap_id: None,
                },
                Err(e),
                None,
            ),
        }
    }

    /// Create an invoice for `amount_sat`, through a new LSP channel if inbound liquidity is
    /// short
    pub async fn receive_payment(&self, amount_sat: u64, description: &str) -> SdkResult<LNInvoice> {
        let _guard = self.lock_op().await?;
        if amount_sat == 0 {
            return Err(SdkError::invalid_input("amount must be positive"));
        }
        let amount_msat = sat_to_msat(amount_sat)?;
        let (invoice, fee_msat) = self
            .create_receive_invoice(ReceiveRequest {
                amount_msat,
                description: InvoiceDescription::Direct(description.to_string()),
                preimage: None,
            })
            .await?;
        info!("created invoice {} with opening fee {} msat", invoice.payment_hash, fee_msat);
        Ok(invoice)
    }

    /// Create and register an invoice, returning it with the LSP opening fee
    pub(crate) async fn create_receive_invoice(
        &self,
        req: ReceiveRequest,
    ) -> SdkResult<(LNInvoice, u64)> {
        let node_state = self.node_state()?;
        let preimage = req.preimage.unwrap_or_else(random_bytes::<32>);
        let payment_secret = random_bytes::<32>();

        let mut route_hints = Vec::new();
        let mut lsp_channel = None;
        let mut fee_msat = 0;
        if req.amount_msat > node_state.max_receivable_msat {
            let lsp = self.active_lsp().await?.ok_or_else(|| {
                SdkError::ChannelCapacityExceeded(format!(
                    "can receive {} msat without a new channel and no lsp is selected",
                    node_state.max_receivable_msat
                ))
            })?;
            fee_msat = lsp.opening_fee_msat(req.amount_msat);
            if fee_msat >= req.amount_msat {
                return Err(SdkError::invalid_input(format!(
                    "amount must exceed the channel opening fee of {} msat",
                    fee_msat
                )));
            }
            route_hints.push(lsp.jit_route_hint());
            lsp_channel = Some(lsp);
        }

        let invoice = create_invoice(
            &InvoiceRequest {
                network: self.config.network,
                amount_msat: req.amount_msat,
                description: req.description.clone(),
                preimage,
                payment_secret,
                timestamp: self.services.clock.now(),
                expiry_secs: DEFAULT_INVOICE_EXPIRY_SECS,
                route_hints,
            },
            &self.keys.node_secret_key()?,
        )?;
        let outgoing_msat = req.amount_msat - fee_msat;

        if let Some(lsp) = lsp_channel {
            let payment_info = PaymentInformation {
                payment_hash: invoice.payment_hash.clone(),
                payment_secret: hex::encode(payment_secret),
                destination: self.node_id().to_string(),
                incoming_amount_msat: req.amount_msat,
                outgoing_amount_msat: outgoing_msat,
            };
            self.net(
                "lsp register payment",
                self.services.lsp_api.register_payment(lsp.id.clone(), lsp.pubkey.clone(), payment_info),
            )
            .await?;
        }
        let description = match &req.description {
            InvoiceDescription::Direct(d) => d.clone(),
            InvoiceDescription::Hash(h) => hex::encode(h),
        };
        self.net(
            "register invoice",
            self.services.node_api.register_invoice(RegisterInvoiceRequest {
                bolt11: invoice.bolt11.clone(),
                payment_hash: invoice.payment_hash.clone(),
                preimage: hex::encode(preimage),
                payment_secret: hex::encode(payment_secret),
                amount_msat: outgoing_msat,
                description,
                expiry_secs: DEFAULT_INVOICE_EXPIRY_SECS,
            }),
        )
        .await?;
        Ok((invoice, fee_msat))
    }

    /// A payment by hash
    pub fn payment_by_hash(&self, hash: &str) -> SdkResult<Option<Payment>> {
        self.ensure_connected()?;
        Ok(self.services.persister.get_payment(&hash.to_ascii_lowercase())?)
    }

    /// Payments matching `filter` with `payment_time` within the inclusive bounds, newest first
    pub fn list_payments(
        &self,
        filter: PaymentTypeFilter,
        from_timestamp: Option<u64>,
        to_timestamp: Option<u64>,
    ) -> SdkResult<Vec<Payment>> {
        self.ensure_connected()?;
        let mut payments: Vec<Payment> = self
            .services
            .persister
            .list_payments()?
            .into_iter()
            .filter(|p| match filter {
                PaymentTypeFilter::Sent => p.payment_type == PaymentType::Sent,
                PaymentTypeFilter::Received => p.payment_type == PaymentType::Received,
                PaymentTypeFilter::All => true,
            })
            .filter(|p| from_timestamp.map_or(true, |from| p.payment_time >= from))
            .filter(|p| to_timestamp.map_or(true, |to| p.payment_time <= to))
            .collect();
        payments.sort_by(|a, b| b.payment_time.cmp(&a.payment_time).then_with(|| a.id.cmp(&b.id)));
        Ok(payments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::session::NodeSession;
    use crate::util::test_utils::*;
    use bitcoin::Network;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn send_payment_test() {
        let env = TestEnv::new();
        env.node.set_balances(100_000_000, 0, 0);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let mut events = session.subscribe_events();
        let bolt11 = env.external_invoice(Some(50_000_000), Network::Regtest);

        let err = session.send_payment(&bolt11, Some(40_000)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousAmount);
        let err = session.send_payment(&bolt11, Some(0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let payment = session.send_payment(&bolt11, None).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Complete);
        assert_eq!(payment.amount_msat, 50_000_000);
        assert_eq!(payment.bolt11.as_deref(), Some(bolt11.as_str()));
        assert!(matches!(events.next().await, Some(SdkEvent::PaymentSucceed { .. })));

        let err = session.send_payment(&bolt11, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(session.payment_by_hash(&payment.id).unwrap(), Some(payment));
    }

    #[tokio::test]
    async fn send_payment_checks_test() {
        let env = TestEnv::new();
        env.node.set_balances(10_000_000, 0, 0);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();

        let zero_amount = env.external_invoice(None, Network::Regtest);
        let err = session.send_payment(&zero_amount, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let payment = session.send_payment(&zero_amount, Some(2_000)).await.unwrap();
        assert_eq!(payment.amount_msat, 2_000_000);

        let mainnet = env.external_invoice(Some(1_000), Network::Bitcoin);
        let err = session.send_payment(&mainnet, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let too_big = env.external_invoice(Some(20_000_000), Network::Regtest);
        let err = session.send_payment(&too_big, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

        let expiring = env.external_invoice(Some(1_000), Network::Regtest);
        env.clock.advance(core::time::Duration::from_secs(DEFAULT_INVOICE_EXPIRY_SECS));
        let err = session.send_payment(&expiring, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = session.send_payment("garbage", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn send_payment_failure_test() {
        let env = TestEnv::new();
        env.node.set_balances(10_000_000, 0, 0);
        env.node.set_route_not_found(true);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let mut events = session.subscribe_events();
        let bolt11 = env.external_invoice(Some(1_000_000), Network::Regtest);
        let err = session.send_payment(&bolt11, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RouteNotFound);
        let failed = session.list_payments(PaymentTypeFilter::Sent, None, None).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, PaymentStatus::Failed);
        assert!(matches!(events.next().await, Some(SdkEvent::PaymentFailed { .. })));

        // a failed payment can be retried
        env.node.set_route_not_found(false);
        let payment = session.send_payment(&bolt11, None).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Complete);
    }

    #[tokio::test]
    async fn send_payment_timeout_test() {
        let env = TestEnv::new();
        env.node.set_balances(10_000_000, 0, 0);
        env.node.set_send_delay(Some(core::time::Duration::from_secs(5)));
        let mut config = env.config();
        config.payment_timeout_secs = 0;
        let node_session = NodeSession::new();
        let session = node_session.connect(config, env.seed(), env.services()).await.unwrap();
        let bolt11 = env.external_invoice(Some(1_000_000), Network::Regtest);
        let err = session.send_payment(&bolt11, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkTimeout);
        let pending = session.list_payments(PaymentTypeFilter::All, None, None).unwrap();
        assert_eq!(pending[0].status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn keysend_test() {
        let env = TestEnv::new();
        env.node.set_balances(10_000_000, 0, 0);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let err = session.send_spontaneous_payment("02zz", 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = session.send_spontaneous_payment(&test_pubkey(3), 20_000).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        let payment = session.send_spontaneous_payment(&test_pubkey(3), 1_000).await.unwrap();
        assert!(payment.keysend);
        assert_eq!(payment.destination_pubkey, test_pubkey(3));
        assert_eq!(payment.amount_msat, 1_000_000);
    }

    #[tokio::test]
    async fn keysend_failure_test() {
        let env = TestEnv::new();
        env.node.set_balances(10_000_000, 0, 0);
        env.node.set_route_not_found(true);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let mut events = session.subscribe_events();
        let err = session.send_spontaneous_payment(&test_pubkey(3), 1_000).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RouteNotFound);
        assert!(matches!(events.next().await, Some(SdkEvent::PaymentFailed { .. })));
        let failed = session.list_payments(PaymentTypeFilter::Sent, None, None).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, PaymentStatus::Failed);
        assert!(failed[0].keysend);
        assert!(failed[0].error.is_some());
        assert_eq!(failed[0].destination_pubkey, test_pubkey(3));
        assert_eq!(failed[0].amount_msat, 1_000_000);
    }

    #[tokio::test]
    async fn amount_overflow_test() {
        let env = TestEnv::new();
        env.node.set_balances(10_000_000, 0, 10_000_000);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let huge = u64::MAX / 10;

        let zero_amount = env.external_invoice(None, Network::Regtest);
        let err = session.send_payment(&zero_amount, Some(huge)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmountOutOfRange);
        let err = session.send_spontaneous_payment(&test_pubkey(3), huge).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmountOutOfRange);
        let err = session.receive_payment(huge, "too much").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmountOutOfRange);

        // nothing was recorded and the session still works
        assert!(session.list_payments(PaymentTypeFilter::All, None, None).unwrap().is_empty());
        assert!(session.send_payment(&zero_amount, Some(1_000)).await.is_ok());
    }

    #[tokio::test]
    async fn reads_during_payment_test() {
        let env = TestEnv::new();
        env.node.set_balances(10_000_000, 0, 0);
        env.node.set_send_delay(Some(core::time::Duration::from_millis(300)));
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let bolt11 = env.external_invoice(Some(1_000_000), Network::Regtest);
        let hash = parse_invoice(&bolt11).unwrap().payment_hash;

        let reads = async {
            tokio::time::sleep(core::time::Duration::from_millis(50)).await;
            let listed = session.list_payments(PaymentTypeFilter::All, None, None).unwrap();
            let by_hash = session.payment_by_hash(&hash).unwrap();
            let info = session.node_info().unwrap();
            (listed, by_hash, info)
        };
        let (sent, (listed, by_hash, info)) = tokio::join!(session.send_payment(&bolt11, None), reads);

        // the reads saw the whole pending record while the payment was in flight
        assert_eq!(listed.len(), 1);
        let pending = by_hash.unwrap();
        assert_eq!(listed[0], pending);
        assert_eq!(pending.status, PaymentStatus::Pending);
        assert_eq!(pending.amount_msat, 1_000_000);
        assert_eq!(pending.bolt11.as_deref(), Some(bolt11.as_str()));
        assert_eq!(info.channels_balance_msat, 10_000_000);

        let sent = sent.unwrap();
        assert_eq!(sent.status, PaymentStatus::Complete);
        assert_eq!(session.payment_by_hash(&hash).unwrap(), Some(sent));
    }

    #[tokio::test]
    async fn receive_payment_test() {
        let env = TestEnv::new();
        env.node.set_balances(0, 0, 10_000_000);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        assert_eq!(
            session.receive_payment(0, "nothing").await.unwrap_err().kind(),
            ErrorKind::InvalidInput
        );

        // enough inbound liquidity
        let invoice = session.receive_payment(5_000, "coffee").await.unwrap();
        assert_eq!(invoice.amount_msat, Some(5_000_000));
        assert_eq!(invoice.description.as_deref(), Some("coffee"));
        assert_eq!(invoice.payee_pubkey, session.node_id());
        assert!(invoice.routing_hints.is_empty());
        assert_eq!(parse_invoice(&invoice.bolt11).unwrap(), invoice);

        // needs a channel but no lsp is selected
        let err = session.receive_payment(50_000, "big").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelCapacityExceeded);

        session.connect_lsp(TEST_LSP_ID).await.unwrap();
        let invoice = session.receive_payment(50_000, "big").await.unwrap();
        assert_eq!(invoice.routing_hints.len(), 1);
        let registered = env.lsp.registered();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].payment_hash, invoice.payment_hash);
        assert_eq!(registered[0].incoming_amount_msat, 50_000_000);
        assert!(registered[0].outgoing_amount_msat < 50_000_000);

        // below the minimum opening fee
        env.node.set_balances(0, 0, 0);
        session.sync().await.unwrap();
        let err = session.receive_payment(1, "tiny").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn receive_and_get_paid_test() {
        let env = TestEnv::new();
        env.node.set_balances(0, 0, 10_000_000);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let mut events = session.subscribe_events();
        let invoice = session.receive_payment(3_000, "tea").await.unwrap();
        env.node.receive(&invoice.bolt11, 3_000_000).unwrap();
        session.sync().await.unwrap();
        assert_eq!(
            events.next().await,
            Some(SdkEvent::InvoicePaid {
                payment_hash: invoice.payment_hash.clone(),
                bolt11: Some(invoice.bolt11.clone()),
            })
        );
        let payment = session.payment_by_hash(&invoice.payment_hash).unwrap().unwrap();
        assert_eq!(payment.payment_type, PaymentType::Received);
        assert_eq!(payment.status, PaymentStatus::Complete);
        assert_eq!(session.node_info().unwrap().channels_balance_msat, 3_000_000);
    }

    #[tokio::test]
    async fn list_payments_test() {
        let env = TestEnv::new();
        for (n, t, time) in [
            (1, PaymentType::Sent, 300),
            (2, PaymentType::Received, 100),
            (3, PaymentType::Sent, 200),
            (4, PaymentType::Received, 400),
        ] {
            env.node.add_payment(make_test_payment(n, t, time));
        }
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let all = session.list_payments(PaymentTypeFilter::All, None, None).unwrap();
        let times: Vec<u64> = all.iter().map(|p| p.payment_time).collect();
        assert_eq!(times, vec![400, 300, 200, 100]);
        let sent = session.list_payments(PaymentTypeFilter::Sent, None, None).unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|p| p.payment_type == PaymentType::Sent));
        let ranged = session.list_payments(PaymentTypeFilter::All, Some(200), Some(300)).unwrap();
        assert_eq!(ranged.iter().map(|p| p.payment_time).collect::<Vec<_>>(), vec![300, 200]);
        assert_eq!(session.payment_by_hash(&"00".repeat(32)).unwrap(), None);
    }
}
