use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::{OutPoint, Txid};
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};
use crate::model::RecommendedFees;
use crate::rest::{get_json, RestClient};
use crate::{Arc, SendSync};

/// Esplora transaction output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vout {
    /// Output script, hex
    pub scriptpubkey: String,
    /// Output address
    pub scriptpubkey_address: Option<String>,
    /// Value, in satoshis
    pub value: u64,
}

/// Esplora transaction input
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vin {
    /// Spent txid
    pub txid: String,
    /// Spent output index
    pub vout: u32,
    /// Spent output
    pub prevout: Option<Vout>,
}

/// Esplora confirmation status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
    /// Whether the transaction is in a block
    pub confirmed: bool,
    /// Block height
    pub block_height: Option<u32>,
    /// Block time
    pub block_time: Option<u64>,
}

/// Esplora transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainTx {
    /// Transaction id
    pub txid: String,
    /// Inputs
    pub vin: Vec<Vin>,
    /// Outputs
    pub vout: Vec<Vout>,
    /// Confirmation status
    pub status: TxStatus,
}

/// An unspent output paying to a watched address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    /// Outpoint
    pub outpoint: OutPoint,
    /// Value, in satoshis
    pub value: u64,
    /// Confirmation height, if confirmed
    pub block_height: Option<u32>,
}

/// Unspent outputs paying to `address`, given all transactions touching it
pub fn address_utxos(address: &str, txs: &[OnchainTx]) -> SdkResult<Vec<Utxo>> {
    let mut spent = BTreeSet::new();
    for tx in txs {
        for input in tx.vin.iter() {
            spent.insert((input.txid.clone(), input.vout));
        }
    }
    let mut utxos = Vec::new();
    for tx in txs {
        for (index, output) in tx.vout.iter().enumerate() {
            let index = index as u32;
            if output.scriptpubkey_address.as_deref() != Some(address)
                || spent.contains(&(tx.txid.clone(), index))
            {
                continue;
            }
            let txid = Txid::from_str(&tx.txid)
                .map_err(|e| SdkError::generic(format!("bad txid {}: {}", tx.txid, e)))?;
            utxos.push(Utxo {
                outpoint: OutPoint { txid, vout: index },
                value: output.value,
                block_height: if tx.status.confirmed { tx.status.block_height } else { None },
            });
        }
    }
    Ok(utxos)
}

/// On-chain data source
#[async_trait]
pub trait ChainService: SendSync {
    /// Fee rate estimates
    async fn recommended_fees(&self) -> SdkResult<RecommendedFees>;
    /// All transactions touching `address`
    async fn address_transactions(&self, address: String) -> SdkResult<Vec<OnchainTx>>;
    /// Chain tip height
    async fn current_tip(&self) -> SdkResult<u32>;
    /// Broadcast a serialized transaction, returning its txid
    async fn broadcast_transaction(&self, tx: Vec<u8>) -> SdkResult<String>;
}

/// [`ChainService`] over an Esplora / mempool.space HTTP API
pub struct EsploraChainService {
    base_url: String,
    client: Arc<dyn RestClient>,
}

impl EsploraChainService {
    /// Create a service rooted at `base_url`, e.g. `https://mempool.space/api`
    pub fn new(base_url: &str, client: Arc<dyn RestClient>) -> Self {
        EsploraChainService { base_url: base_url.trim_end_matches('/').to_string(), client }
    }
}

impl SendSync for EsploraChainService {}

#[async_trait]
impl ChainService for EsploraChainService {
    async fn recommended_fees(&self) -> SdkResult<RecommendedFees> {
        get_json(self.client.as_ref(), &format!("{}/v1/fees/recommended", self.base_url)).await
    }

    async fn address_transactions(&self, address: String) -> SdkResult<Vec<OnchainTx>> {
        get_json(self.client.as_ref(), &format!("{}/address/{}/txs", self.base_url, address)).await
    }

    async fn current_tip(&self) -> SdkResult<u32> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let (status, body) = self.client.get(&url).await?;
        if status != 200 {
            return Err(SdkError::generic(format!("GET {} returned {}", url, status)));
        }
        body.trim().parse::<u32>().map_err(|e| SdkError::generic(format!("tip height: {}", e)))
    }

    async fn broadcast_transaction(&self, tx: Vec<u8>) -> SdkResult<String> {
        let url = format!("{}/tx", self.base_url);
        let (status, body) = self.client.post(&url, hex::encode(tx)).await?;
        if status != 200 {
            return Err(SdkError::generic(format!("broadcast rejected: {}", body)));
        }
        info!("broadcast {}", body.trim());
        Ok(body.trim().to_string())
    }
}
