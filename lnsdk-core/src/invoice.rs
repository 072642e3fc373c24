use core::str::FromStr;
use core::time::Duration;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::Network;
use lightning_invoice::{
    Bolt11Invoice, Bolt11InvoiceDescriptionRef, Currency, InvoiceBuilder, PaymentSecret,
    RouteHint as Bolt11RouteHint, RouteHintHop as Bolt11RouteHintHop, RoutingFees,
};
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Default invoice expiry, in seconds
pub const DEFAULT_INVOICE_EXPIRY_SECS: u64 = 3600;
/// Default final CLTV delta
pub const DEFAULT_MIN_FINAL_CLTV_EXPIRY_DELTA: u64 = 144;

/// One hop of a private route
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHintHop {
    /// Node id of the hop source, hex
    pub src_node_id: String,
    /// Channel to use
    pub short_channel_id: u64,
    /// Base fee
    pub fees_base_msat: u32,
    /// Proportional fee
    pub fees_proportional_millionths: u32,
    /// CLTV delta
    pub cltv_expiry_delta: u64,
    /// Smallest HTLC
    pub htlc_minimum_msat: Option<u64>,
    /// Largest HTLC
    pub htlc_maximum_msat: Option<u64>,
}

/// A private route
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHint {
    /// Hops, towards us
    pub hops: Vec<RouteHintHop>,
}

impl RouteHint {
    fn to_bolt11(&self) -> SdkResult<Bolt11RouteHint> {
        let mut hops = Vec::with_capacity(self.hops.len());
        for hop in self.hops.iter() {
            let src_node_id = PublicKey::from_str(&hop.src_node_id)
                .map_err(|e| SdkError::invalid_input(format!("route hint node: {}", e)))?;
            let cltv_expiry_delta = u16::try_from(hop.cltv_expiry_delta)
                .map_err(|_| SdkError::invalid_input("route hint cltv delta"))?;
            hops.push(Bolt11RouteHintHop {
                src_node_id,
                short_channel_id: hop.short_channel_id,
                fees: RoutingFees {
                    base_msat: hop.fees_base_msat,
                    proportional_millionths: hop.fees_proportional_millionths,
                },
                cltv_expiry_delta,
                htlc_minimum_msat: hop.htlc_minimum_msat,
                htlc_maximum_msat: hop.htlc_maximum_msat,
            });
        }
        Ok(Bolt11RouteHint(hops))
    }

    fn from_bolt11(hint: &Bolt11RouteHint) -> Self {
        let hops = hint
            .0
            .iter()
            .map(|hop| RouteHintHop {
                src_node_id: hop.src_node_id.to_string(),
                short_channel_id: hop.short_channel_id,
                fees_base_msat: hop.fees.base_msat,
                fees_proportional_millionths: hop.fees.proportional_millionths,
                cltv_expiry_delta: hop.cltv_expiry_delta as u64,
                htlc_minimum_msat: hop.htlc_minimum_msat,
                htlc_maximum_msat: hop.htlc_maximum_msat,
            })
            .collect();
        RouteHint { hops }
    }
}

/// A decoded BOLT-11 invoice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LNInvoice {
    /// The encoded invoice
    pub bolt11: String,
    /// Network the invoice is for
    pub network: Network,
    /// Payee node id, hex
    pub payee_pubkey: String,
    /// Payment hash, hex
    pub payment_hash: String,
    /// Direct description
    pub description: Option<String>,
    /// Description hash, hex
    pub description_hash: Option<String>,
    /// Amount, if fixed
    pub amount_msat: Option<u64>,
    /// Creation time, seconds since the UNIX epoch
    pub timestamp: u64,
    /// Seconds after `timestamp` the invoice stays valid
    pub expiry: u64,
    /// Private routes
    pub routing_hints: Vec<RouteHint>,
    /// Payment secret, hex
    pub payment_secret: String,
    /// Final CLTV delta
    pub min_final_cltv_expiry_delta: u64,
}

impl LNInvoice {
    /// Whether the invoice expired at `now_secs`
    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        now_secs >= self.timestamp.saturating_add(self.expiry)
    }
}

/// Decode a BOLT-11 invoice, tolerating a `lightning:` prefix
pub fn parse_invoice(bolt11: &str) -> SdkResult<LNInvoice> {
    let trimmed = bolt11.trim();
    let trimmed = trimmed
        .strip_prefix("lightning:")
        .or_else(|| trimmed.strip_prefix("LIGHTNING:"))
        .unwrap_or(trimmed);
    let invoice = Bolt11Invoice::from_str(trimmed)
        .map_err(|e| SdkError::invalid_input(format!("invoice: {}", e)))?;
    Ok(to_ln_invoice(&invoice))
}

fn to_ln_invoice(invoice: &Bolt11Invoice) -> LNInvoice {
    let (description, description_hash) = match invoice.description() {
        Bolt11InvoiceDescriptionRef::Direct(d) => (Some(d.to_string()), None),
        Bolt11InvoiceDescriptionRef::Hash(h) => (None, Some(h.0.to_string())),
    };
    let payee = invoice.payee_pub_key().cloned().unwrap_or_else(|| invoice.recover_payee_pub_key());
    LNInvoice {
        bolt11: invoice.to_string(),
        network: invoice.network(),
        payee_pubkey: payee.to_string(),
        payment_hash: invoice.payment_hash().to_string(),
        description,
        description_hash,
        amount_msat: invoice.amount_milli_satoshis(),
        timestamp: invoice.duration_since_epoch().as_secs(),
        expiry: invoice.expiry_time().as_secs(),
        routing_hints: invoice.route_hints().iter().map(RouteHint::from_bolt11).collect(),
        payment_secret: hex::encode(invoice.payment_secret().0),
        min_final_cltv_expiry_delta: invoice.min_final_cltv_expiry_delta(),
    }
}

/// Description of an invoice to create
#[derive(Clone, Debug)]
pub enum InvoiceDescription {
    /// Direct description
    Direct(String),
    /// SHA256 of a longer description
    Hash([u8; 32]),
}

/// Parameters for [`create_invoice`]
#[derive(Clone, Debug)]
pub struct InvoiceRequest {
    /// Network
    pub network: Network,
    /// Amount
    pub amount_msat: u64,
    /// Description
    pub description: InvoiceDescription,
    /// Payment preimage
    pub preimage: [u8; 32],
    /// Payment secret
    pub payment_secret: [u8; 32],
    /// Creation time, since the UNIX epoch
    pub timestamp: Duration,
    /// Expiry, in seconds
    pub expiry_secs: u64,
    /// Private routes
    pub route_hints: Vec<RouteHint>,
}

pub(crate) fn currency(network: Network) -> Currency {
    match network {
        Network::Bitcoin => Currency::Bitcoin,
        Network::Testnet => Currency::BitcoinTestnet,
        Network::Signet => Currency::Signet,
        _ => Currency::Regtest,
    }
}

/// Build an invoice, signed with the node key
pub fn create_invoice(req: &InvoiceRequest, node_key: &SecretKey) -> SdkResult<LNInvoice> {
    let payment_hash = sha256::Hash::hash(&req.preimage);
    let builder = InvoiceBuilder::new(currency(req.network));
    let builder = match &req.description {
        InvoiceDescription::Direct(d) => builder.description(d.clone()),
        InvoiceDescription::Hash(h) => builder.description_hash(sha256::Hash::from_byte_array(*h)),
    };
    let mut builder = builder
        .payment_hash(payment_hash)
        .payment_secret(PaymentSecret(req.payment_secret))
        .duration_since_epoch(req.timestamp)
        .min_final_cltv_expiry_delta(DEFAULT_MIN_FINAL_CLTV_EXPIRY_DELTA)
        .amount_milli_satoshis(req.amount_msat)
        .expiry_time(Duration::from_secs(req.expiry_secs));
    for hint in req.route_hints.iter() {
        builder = builder.private_route(hint.to_bolt11()?);
    }
    let secp_ctx = Secp256k1::signing_only();
    let invoice = builder
        .build_signed(|hash| secp_ctx.sign_ecdsa_recoverable(hash, node_key))
        .map_err(|e| SdkError::generic(format!("create invoice: {}", e)))?;
    Ok(to_ln_invoice(&invoice))
}
