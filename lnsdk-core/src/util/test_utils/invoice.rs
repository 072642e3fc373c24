use core::time::Duration;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::Network;
use lightning_invoice::{InvoiceBuilder, PaymentSecret};

use crate::invoice::{currency, InvoiceDescription, DEFAULT_INVOICE_EXPIRY_SECS};

/// Key of the payee behind invoices we pay in tests
pub const EXTERNAL_PAYEE_KEY: [u8; 32] = [42; 32];

/// Sign an invoice for `payment_hash` with `key`, without registering it anywhere
pub fn sign_invoice(
    network: Network,
    amount_msat: Option<u64>,
    payment_hash: [u8; 32],
    description: InvoiceDescription,
    timestamp: Duration,
    key: &SecretKey,
) -> String {
    let builder = InvoiceBuilder::new(currency(network));
    let builder = match description {
        InvoiceDescription::Direct(d) => builder.description(d),
        InvoiceDescription::Hash(h) => builder.description_hash(sha256::Hash::from_byte_array(h)),
    };
    let builder = builder
        .payment_hash(sha256::Hash::from_byte_array(payment_hash))
        .payment_secret(PaymentSecret([7; 32]))
        .duration_since_epoch(timestamp)
        .min_final_cltv_expiry_delta(144)
        .expiry_time(Duration::from_secs(DEFAULT_INVOICE_EXPIRY_SECS));
    let builder = match amount_msat {
        Some(amount) => builder.amount_milli_satoshis(amount),
        None => builder,
    };
    builder
        .build_signed(|hash| Secp256k1::new().sign_ecdsa_recoverable(hash, key))
        .unwrap()
        .to_string()
}

/// An invoice from an unrelated payee
pub fn make_external_invoice(
    network: Network,
    amount_msat: Option<u64>,
    payment_hash: [u8; 32],
    description: InvoiceDescription,
    timestamp: Duration,
) -> String {
    let key = SecretKey::from_slice(&EXTERNAL_PAYEE_KEY).unwrap();
    sign_invoice(network, amount_msat, payment_hash, description, timestamp, &key)
}
