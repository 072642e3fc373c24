use log::{debug, info};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{ConfigResolver, EnvironmentType, NodeBackend, NodeConfig};
use crate::error::SdkError;
use crate::events::{EventBus, EventStream, LogEntry, SdkEvent};
use crate::input_parser::parse_input;
use crate::invoice::parse_invoice;
use crate::lnurl::{LnUrlAuthRequestData, LnUrlPayRequestData, LnUrlWithdrawRequestData};
use crate::model::PaymentTypeFilter;
use crate::seed::{derive_seed, Seed};
use crate::session::{NodeSession, Session, SessionServices};
use crate::util::status::{invalid_argument, Status};
use crate::Arc;

/// Result handed to the transport: a JSON value or an error status
pub type BindingResult = Result<Value, Status>;

/// Fields whose values never reach a log line
pub const REDACTED_FIELDS: [&str; 4] = ["private_key", "preimage", "claim_private_key", "seed"];

macro_rules! log_req_enter {
    ($name: expr) => {
        info!("ENTER {}", $name);
    };
    ($name: expr, $req: expr) => {
        info!("ENTER {}", $name);
        if log::log_enabled!(log::Level::Debug) {
            debug!("ENTER {}: {}", $name, redacted(&json!($req)));
        }
    };
}

macro_rules! log_req_reply {
    ($name: expr, $reply: expr) => {
        if log::log_enabled!(log::Level::Debug) {
            debug!("REPLY {}: {}", $name, redacted(&$reply));
        }
        info!("REPLY {}", $name);
    };
}

/// A copy of `value` with secret fields masked
pub fn redacted(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if REDACTED_FIELDS.contains(&k.as_str()) {
                        (k.clone(), Value::String("<redacted>".into()))
                    } else {
                        (k.clone(), redacted(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redacted).collect()),
        other => other.clone(),
    }
}

fn to_value<T: Serialize>(value: &T) -> BindingResult {
    serde_json::to_value(value).map_err(|e| SdkError::from(e).into())
}

fn ack() -> Value {
    json!({ "status": "ok" })
}

fn optional_amount(amount_sat: u64) -> Option<u64> {
    if amount_sat == 0 {
        None
    } else {
        Some(amount_sat)
    }
}

fn optional_str(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn from_arg<T: serde::de::DeserializeOwned>(name: &str, value: Value) -> Result<T, Status> {
    serde_json::from_value(value).map_err(|e| invalid_argument(format!("{}: {}", name, e)))
}

/// The transport facing surface.
///
/// Takes primitive and dictionary arguments, maps the zero / empty sentinels to absent
/// values, and reports acknowledgements as `{"status":"ok"}` and absent results as `null`.
pub struct BindingSdk {
    node_session: NodeSession,
    services: SessionServices,
    log_stream: Arc<EventBus<LogEntry>>,
}

impl BindingSdk {
    /// Create a shim which connects sessions with `services`
    pub fn new(services: SessionServices) -> Self {
        BindingSdk { node_session: NodeSession::new(), services, log_stream: Arc::new(EventBus::new()) }
    }

    /// The log line bus, to be fed by the logging setup
    pub fn log_stream(&self) -> Arc<EventBus<LogEntry>> {
        Arc::clone(&self.log_stream)
    }

    /// Subscribe to log lines
    pub fn subscribe_logs(&self) -> EventStream<LogEntry> {
        self.log_stream.subscribe()
    }

    async fn session(&self) -> Result<Arc<Session>, Status> {
        Ok(self.node_session.session().await?)
    }

    /// Hex seed of a mnemonic
    pub fn mnemonic_to_seed(&self, phrase: &str) -> BindingResult {
        log_req_enter!("mnemonic_to_seed");
        let seed = derive_seed(phrase)?;
        Ok(Value::String(hex::encode(seed.as_bytes())))
    }

    /// Default configuration for an environment
    pub fn default_config(
        &self,
        environment: &str,
        api_key: &str,
        node_config: Value,
        working_dir: &str,
    ) -> BindingResult {
        log_req_enter!("default_config", (environment, &node_config, working_dir));
        let environment: EnvironmentType = environment.parse()?;
        let backend = NodeBackend::from_json(node_config)?;
        let config = ConfigResolver::build_config(
            environment,
            optional_str(api_key),
            backend,
            working_dir,
        )?;
        let reply = to_value(&config)?;
        log_req_reply!("default_config", reply);
        Ok(reply)
    }

    /// Connect a session
    pub async fn connect(&self, config: Value, seed_hex: &str) -> BindingResult {
        log_req_enter!("connect");
        let config: NodeConfig = from_arg("config", config)?;
        let seed = hex::decode(seed_hex).map_err(|e| invalid_argument(format!("seed: {}", e)))?;
        let seed = Seed::from_bytes(&seed)?;
        let session = self.node_session.connect(config, seed, self.services.clone()).await?;
        info!("REPLY connect {}", session.node_id());
        Ok(ack())
    }

    /// Disconnect the session
    pub async fn disconnect(&self) -> BindingResult {
        log_req_enter!("disconnect");
        self.node_session.disconnect().await?;
        Ok(ack())
    }

    /// Subscribe to session events
    pub async fn subscribe_events(&self) -> Result<EventStream<SdkEvent>, Status> {
        Ok(self.session().await?.subscribe_events())
    }

    /// Sync with the node and services
    pub async fn sync(&self) -> BindingResult {
        log_req_enter!("sync");
        self.session().await?.sync().await?;
        Ok(ack())
    }

    /// Node summary
    pub async fn node_info(&self) -> BindingResult {
        log_req_enter!("node_info");
        let reply = to_value(&self.session().await?.node_info()?)?;
        log_req_reply!("node_info", reply);
        Ok(reply)
    }

    /// Decode an invoice
    pub fn parse_invoice(&self, bolt11: &str) -> BindingResult {
        log_req_enter!("parse_invoice", bolt11);
        let reply = to_value(&parse_invoice(bolt11)?)?;
        log_req_reply!("parse_invoice", reply);
        Ok(reply)
    }

    /// Classify user input
    pub async fn parse_input(&self, input: &str) -> BindingResult {
        log_req_enter!("parse_input", input);
        let parsed = parse_input(input, self.services.rest_client.as_ref()).await?;
        let reply = to_value(&parsed)?;
        log_req_reply!("parse_input", reply);
        Ok(reply)
    }

    /// Pay an invoice, `amount_sat` zero meaning the invoice amount
    pub async fn send_payment(&self, bolt11: &str, amount_sat: u64) -> BindingResult {
        log_req_enter!("send_payment", (bolt11, amount_sat));
        let payment =
            self.session().await?.send_payment(bolt11, optional_amount(amount_sat)).await?;
        let reply = to_value(&payment)?;
        log_req_reply!("send_payment", reply);
        Ok(reply)
    }

    /// Keysend
    pub async fn send_spontaneous_payment(&self, node_id: &str, amount_sat: u64) -> BindingResult {
        log_req_enter!("send_spontaneous_payment", (node_id, amount_sat));
        let payment = self.session().await?.send_spontaneous_payment(node_id, amount_sat).await?;
        let reply = to_value(&payment)?;
        log_req_reply!("send_spontaneous_payment", reply);
        Ok(reply)
    }

    /// Create an invoice
    pub async fn receive_payment(&self, amount_sat: u64, description: &str) -> BindingResult {
        log_req_enter!("receive_payment", (amount_sat, description));
        let invoice = self.session().await?.receive_payment(amount_sat, description).await?;
        let reply = to_value(&invoice)?;
        log_req_reply!("receive_payment", reply);
        Ok(reply)
    }

    /// LNURL-auth
    pub async fn lnurl_auth(&self, req: Value) -> BindingResult {
        log_req_enter!("lnurl_auth", req);
        let req: LnUrlAuthRequestData = from_arg("req", req)?;
        let reply = to_value(&self.session().await?.lnurl_auth(&req).await?)?;
        log_req_reply!("lnurl_auth", reply);
        Ok(reply)
    }

    /// LNURL-pay, an empty comment meaning none
    pub async fn pay_lnurl(&self, req: Value, amount_sat: u64, comment: &str) -> BindingResult {
        log_req_enter!("pay_lnurl", (&req, amount_sat, comment));
        let req: LnUrlPayRequestData = from_arg("req", req)?;
        let result =
            self.session().await?.pay_lnurl(&req, amount_sat, optional_str(comment)).await?;
        let reply = to_value(&result)?;
        log_req_reply!("pay_lnurl", reply);
        Ok(reply)
    }

    /// LNURL-withdraw, an empty description meaning the service default
    pub async fn withdraw_lnurl(
        &self,
        req: Value,
        amount_sat: u64,
        description: &str,
    ) -> BindingResult {
        log_req_enter!("withdraw_lnurl", (&req, amount_sat, description));
        let req: LnUrlWithdrawRequestData = from_arg("req", req)?;
        let result = self
            .session()
            .await?
            .withdraw_lnurl(&req, amount_sat, optional_str(description))
            .await?;
        let reply = to_value(&result)?;
        log_req_reply!("withdraw_lnurl", reply);
        Ok(reply)
    }

    /// A payment by hash, or `null`
    pub async fn payment_by_hash(&self, hash: &str) -> BindingResult {
        log_req_enter!("payment_by_hash", hash);
        let reply = match self.session().await?.payment_by_hash(hash)? {
            Some(payment) => to_value(&payment)?,
            None => Value::Null,
        };
        log_req_reply!("payment_by_hash", reply);
        Ok(reply)
    }

    /// Payments in a time window, zero timestamps meaning unbounded
    pub async fn list_payments(
        &self,
        filter: &str,
        from_timestamp: u64,
        to_timestamp: u64,
    ) -> BindingResult {
        log_req_enter!("list_payments", (filter, from_timestamp, to_timestamp));
        let filter: PaymentTypeFilter = filter.parse()?;
        let payments = self.session().await?.list_payments(
            filter,
            optional_amount(from_timestamp),
            optional_amount(to_timestamp),
        )?;
        let reply = to_value(&payments)?;
        log_req_reply!("list_payments", reply);
        Ok(reply)
    }

    /// Move all on-chain funds to an address
    pub async fn sweep(&self, to_address: &str, sat_per_vbyte: u32) -> BindingResult {
        log_req_enter!("sweep", (to_address, sat_per_vbyte));
        let txid = self.session().await?.sweep(to_address, sat_per_vbyte).await?;
        Ok(json!({ "txid": txid }))
    }

    /// Start or continue a submarine swap
    pub async fn receive_onchain(&self) -> BindingResult {
        log_req_enter!("receive_onchain");
        let reply = to_value(&self.session().await?.receive_onchain().await?)?;
        log_req_reply!("receive_onchain", reply);
        Ok(reply)
    }

    /// The swap in progress, or `null`
    pub async fn in_progress_swap(&self) -> BindingResult {
        log_req_enter!("in_progress_swap");
        let reply = match self.session().await?.in_progress_swap()? {
            Some(swap) => to_value(&swap)?,
            None => Value::Null,
        };
        log_req_reply!("in_progress_swap", reply);
        Ok(reply)
    }

    /// Swaps that can be refunded
    pub async fn list_refundables(&self) -> BindingResult {
        log_req_enter!("list_refundables");
        let reply = to_value(&self.session().await?.list_refundables()?)?;
        log_req_reply!("list_refundables", reply);
        Ok(reply)
    }

    /// Refund a swap
    pub async fn refund(
        &self,
        swap_address: &str,
        to_address: &str,
        sat_per_vbyte: u32,
    ) -> BindingResult {
        log_req_enter!("refund", (swap_address, to_address, sat_per_vbyte));
        let txid = self.session().await?.refund(swap_address, to_address, sat_per_vbyte).await?;
        Ok(json!({ "txid": txid }))
    }

    /// Reverse swap fee quote
    pub async fn fetch_reverse_swap_fees(&self) -> BindingResult {
        log_req_enter!("fetch_reverse_swap_fees");
        let reply = to_value(&self.session().await?.fetch_reverse_swap_fees().await?)?;
        log_req_reply!("fetch_reverse_swap_fees", reply);
        Ok(reply)
    }

    /// Start a reverse swap
    pub async fn send_onchain(
        &self,
        amount_sat: u64,
        onchain_recipient_address: &str,
        pair_hash: &str,
        sat_per_vbyte: u32,
    ) -> BindingResult {
        log_req_enter!(
            "send_onchain",
            (amount_sat, onchain_recipient_address, pair_hash, sat_per_vbyte)
        );
        let swap = self
            .session()
            .await?
            .send_onchain(amount_sat, onchain_recipient_address, pair_hash, sat_per_vbyte)
            .await?;
        let reply = to_value(&swap)?;
        log_req_reply!("send_onchain", reply);
        Ok(reply)
    }

    /// Reverse swaps in progress
    pub async fn in_progress_reverse_swaps(&self) -> BindingResult {
        log_req_enter!("in_progress_reverse_swaps");
        let reply = to_value(&self.session().await?.in_progress_reverse_swaps()?)?;
        log_req_reply!("in_progress_reverse_swaps", reply);
        Ok(reply)
    }

    /// Available LSPs
    pub async fn list_lsps(&self) -> BindingResult {
        log_req_enter!("list_lsps");
        let reply = to_value(&self.session().await?.list_lsps().await?)?;
        log_req_reply!("list_lsps", reply);
        Ok(reply)
    }

    /// Select and connect an LSP
    pub async fn connect_lsp(&self, lsp_id: &str) -> BindingResult {
        log_req_enter!("connect_lsp", lsp_id);
        self.session().await?.connect_lsp(lsp_id).await?;
        Ok(ack())
    }

    /// An LSP by id, or `null`
    pub async fn fetch_lsp_info(&self, lsp_id: &str) -> BindingResult {
        log_req_enter!("fetch_lsp_info", lsp_id);
        let reply = match self.session().await?.fetch_lsp_info(lsp_id).await? {
            Some(lsp) => to_value(&lsp)?,
            None => Value::Null,
        };
        log_req_reply!("fetch_lsp_info", reply);
        Ok(reply)
    }

    /// The selected LSP id, or `null`
    pub async fn lsp_id(&self) -> BindingResult {
        log_req_enter!("lsp_id");
        Ok(self.session().await?.lsp_id()?.map_or(Value::Null, Value::String))
    }

    /// Close the channels with the selected LSP
    pub async fn close_lsp_channels(&self) -> BindingResult {
        log_req_enter!("close_lsp_channels");
        self.session().await?.close_lsp_channels().await?;
        Ok(ack())
    }

    /// Fee rate estimates
    pub async fn recommended_fees(&self) -> BindingResult {
        log_req_enter!("recommended_fees");
        to_value(&self.session().await?.recommended_fees().await?)
    }

    /// Supported fiat currencies
    pub async fn list_fiat_currencies(&self) -> BindingResult {
        log_req_enter!("list_fiat_currencies");
        to_value(&self.session().await?.list_fiat_currencies().await?)
    }

    /// BTC prices
    pub async fn fetch_fiat_rates(&self) -> BindingResult {
        log_req_enter!("fetch_fiat_rates");
        to_value(&self.session().await?.fetch_fiat_rates().await?)
    }

    /// Upload a backup now
    pub async fn backup(&self) -> BindingResult {
        log_req_enter!("backup");
        self.session().await?.backup().await?;
        Ok(ack())
    }

    /// Backup progress
    pub async fn backup_status(&self) -> BindingResult {
        log_req_enter!("backup_status");
        to_value(&self.session().await?.backup_status()?)
    }

    /// Backend developer command
    pub async fn execute_dev_command(&self, command: &str) -> BindingResult {
        log_req_enter!("execute_dev_command", command);
        let output = self.session().await?.execute_dev_command(command).await?;
        Ok(Value::String(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::util::status::Code;
    use crate::util::test_utils::*;

    async fn connected(env: &TestEnv) -> BindingSdk {
        let sdk = BindingSdk::new(env.services());
        let config = serde_json::to_value(env.config()).unwrap();
        let seed = hex::encode(env.seed().as_bytes());
        assert_eq!(sdk.connect(config, &seed).await.unwrap(), json!({"status": "ok"}));
        sdk
    }

    #[test]
    fn redacted_test() {
        let value = json!({
            "id": "a",
            "private_key": "00",
            "nested": [{"preimage": "11", "claim_private_key": "22", "amount": 3}],
        });
        assert_eq!(
            redacted(&value),
            json!({
                "id": "a",
                "private_key": "<redacted>",
                "nested": [{"preimage": "<redacted>", "claim_private_key": "<redacted>", "amount": 3}],
            })
        );
    }

    #[test]
    fn mnemonic_and_config_test() {
        let env = TestEnv::new();
        let sdk = BindingSdk::new(env.services());
        let seed = sdk.mnemonic_to_seed(TEST_MNEMONIC).unwrap();
        assert_eq!(seed.as_str().unwrap().len(), 128);
        let err = sdk.mnemonic_to_seed("not a mnemonic").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMnemonic);

        let dir = tempfile::tempdir().unwrap();
        let wd = dir.path().to_str().unwrap();
        let config = sdk
            .default_config("regtest", "", json!({"type": "greenlight", "config": null}), wd)
            .unwrap();
        assert_eq!(config["network"], "regtest");
        assert_eq!(config["api_key"], Value::Null);
        let err = sdk.default_config("regtest", "", json!({"type": "lnd"}), wd).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedNodeConfig);
    }

    #[tokio::test]
    async fn not_connected_test() {
        let env = TestEnv::new();
        let sdk = BindingSdk::new(env.services());
        let err = sdk.node_info().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert_eq!(err.code(), Code::FailedPrecondition);
        assert_eq!(sdk.disconnect().await.unwrap_err().kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn sentinels_test() {
        let env = TestEnv::new();
        let sdk = connected(&env).await;

        let config = serde_json::to_value(env.config()).unwrap();
        let seed = hex::encode(env.seed().as_bytes());
        let err = sdk.connect(config, &seed).await.unwrap_err();
        assert_eq!(err.to_json(), json!({"code": "AlreadyConnected", "message": "already initialized"}));

        assert_eq!(sdk.payment_by_hash(&"00".repeat(32)).await.unwrap(), Value::Null);
        assert_eq!(sdk.in_progress_swap().await.unwrap(), Value::Null);
        assert_eq!(sdk.fetch_lsp_info("nope").await.unwrap(), Value::Null);
        assert_eq!(sdk.lsp_id().await.unwrap(), Value::Null);
        assert_eq!(sdk.list_payments("all", 0, 0).await.unwrap(), json!([]));
        assert_eq!(sdk.list_payments("bogus", 0, 0).await.unwrap_err().kind(), ErrorKind::InvalidInput);

        assert_eq!(sdk.connect_lsp(TEST_LSP_ID).await.unwrap(), json!({"status": "ok"}));
        assert_eq!(sdk.lsp_id().await.unwrap(), json!(TEST_LSP_ID));

        let err = sdk.send_payment("garbage", 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.code(), Code::InvalidArgument);

        assert_eq!(sdk.disconnect().await.unwrap(), json!({"status": "ok"}));
        assert_eq!(sdk.sync().await.unwrap_err().kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn receive_test() {
        let env = TestEnv::new();
        env.node.set_balances(0, 0, 100_000_000);
        let sdk = connected(&env).await;
        let invoice = sdk.receive_payment(1_000, "").await.unwrap();
        assert_eq!(invoice["amount_msat"], 1_000_000);
        let hash = invoice["payment_hash"].as_str().unwrap().to_string();
        let decoded = sdk.parse_invoice(invoice["bolt11"].as_str().unwrap()).unwrap();
        assert_eq!(decoded["payment_hash"], json!(hash));
        let input = sdk.parse_input(invoice["bolt11"].as_str().unwrap()).await.unwrap();
        assert_eq!(input["type"], "bolt11");
    }
}
