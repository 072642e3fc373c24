use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use lnsdk::bitcoin::Network;
use lnsdk::config::{ConfigResolver, EnvironmentType, NodeBackend};
use lnsdk::input_parser::parse_input;
use lnsdk::invoice::parse_invoice;
use lnsdk::rest::ReqwestRestClient;
use lnsdk::seed::{derive_seed, KeyMaterial};
use lnsdk_util::util::{abort_on_panic, setup_logging};
use log::info;
use serde_json::{json, Value};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(long, help = "working directory, defaults to $LNSDK_WORKING_DIR or ~/.lnsdk", value_parser)]
    working_dir: Option<PathBuf>,

    #[clap(
        long,
        help = "log to the console and the working directory at this level, defaults to $LNSDK_LOG_LEVEL",
        value_parser
    )]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

impl Cli {
    fn working_dir(&self) -> PathBuf {
        self.working_dir.clone().unwrap_or_else(lnsdk_util::working_dir)
    }

    fn log_level(&self) -> Option<String> {
        self.log_level.clone().or_else(lnsdk_util::log_level)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Hex seed of a BIP-39 mnemonic
    #[clap(name = "mnemonic-to-seed")]
    MnemonicToSeed { words: Vec<String> },
    /// Node id a mnemonic derives on a network
    #[clap(name = "node-id")]
    NodeId {
        #[clap(long, default_value = "bitcoin", value_parser)]
        network: String,
        words: Vec<String>,
    },
    /// Decode a BOLT-11 invoice
    #[clap(name = "parse-invoice")]
    ParseInvoice { bolt11: String },
    /// Classify an address, invoice, node id, LNURL or lightning address
    #[clap(name = "parse-input")]
    ParseInput { input: String },
    /// Config for an environment, creating the working directory
    #[clap(name = "default-config")]
    DefaultConfig {
        #[clap(long, default_value = "production", value_parser)]
        env: String,
        #[clap(long, help = "defaults to $LNSDK_API_KEY", value_parser)]
        api_key: Option<String>,
        #[clap(long, help = "greenlight invite code", value_parser)]
        invite_code: Option<String>,
    },
}

fn mnemonic_to_seed(words: &[String]) -> anyhow::Result<Value> {
    let seed = derive_seed(&words.join(" "))?;
    Ok(json!(hex::encode(seed.as_bytes())))
}

fn node_id(network: &str, words: &[String]) -> anyhow::Result<Value> {
    let network = Network::from_str(network)?;
    let keys = KeyMaterial::new(derive_seed(&words.join(" "))?, network);
    Ok(json!(keys.node_id()?.to_string()))
}

fn decode_invoice(bolt11: &str) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(parse_invoice(bolt11)?)?)
}

async fn classify_input(input: &str) -> anyhow::Result<Value> {
    let rest = ReqwestRestClient::new(HTTP_TIMEOUT)?;
    Ok(serde_json::to_value(parse_input(input, &rest).await?)?)
}

fn default_config(
    env: &str,
    api_key: Option<String>,
    invite_code: Option<String>,
    working_dir: PathBuf,
) -> anyhow::Result<Value> {
    let environment = EnvironmentType::from_str(env)?;
    let backend = NodeBackend::from_json(json!({
        "type": "greenlight",
        "config": { "invite_code": invite_code },
    }))?;
    let config = ConfigResolver::build_config(
        environment,
        api_key.or_else(lnsdk_util::api_key),
        backend,
        working_dir,
    )?;
    Ok(serde_json::to_value(&config)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    abort_on_panic();
    let args = Cli::parse();
    let working_dir = args.working_dir();
    if let Some(level) = args.log_level() {
        setup_logging(&working_dir, "lnsdk-cli", &level)?;
    }
    info!("{:?}", args.command);

    let response = match args.command {
        Commands::MnemonicToSeed { words } => mnemonic_to_seed(&words)?,
        Commands::NodeId { network, words } => node_id(&network, &words)?,
        Commands::ParseInvoice { bolt11 } => decode_invoice(&bolt11)?,
        Commands::ParseInput { input } => classify_input(&input).await?,
        Commands::DefaultConfig { env, api_key, invite_code } =>
            default_config(&env, api_key, invite_code, working_dir)?,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnsdk::invoice::InvoiceDescription;
    use lnsdk::util::test_utils::{make_external_invoice, TEST_MNEMONIC, TEST_REGTEST_ADDRESS};

    fn words() -> Vec<String> {
        TEST_MNEMONIC.split(' ').map(String::from).collect()
    }

    #[test]
    fn test_cli() {
        let args =
            vec!["lnsdk-cli", "--working-dir=/tmp/x", "--log-level=debug", "parse-invoice", "lnbc1"];
        let cli = Cli::parse_from(args);
        assert_eq!(cli.working_dir(), PathBuf::from("/tmp/x"));
        assert_eq!(cli.log_level().as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::ParseInvoice { .. }));

        let mut args = vec!["lnsdk-cli", "node-id", "--network", "regtest"];
        args.extend(TEST_MNEMONIC.split(' '));
        let cli = Cli::parse_from(args);
        match cli.command {
            Commands::NodeId { network, words } => {
                assert_eq!(network, "regtest");
                assert_eq!(words.len(), 12);
            }
            _ => panic!("expected node-id"),
        }
    }

    #[test]
    fn test_fail_without_command() {
        assert!(Cli::try_parse_from(vec!["lnsdk-cli"]).is_err());
    }

    #[test]
    fn mnemonic_test() {
        let seed = mnemonic_to_seed(&words()).unwrap();
        assert_eq!(seed.as_str().unwrap().len(), 128);
        assert!(mnemonic_to_seed(&["abandon".to_string()]).is_err());

        let a = node_id("regtest", &words()).unwrap();
        let b = node_id("bitcoin", &words()).unwrap();
        assert_eq!(a.as_str().unwrap().len(), 66);
        assert_eq!(a, b);
        assert!(node_id("moon", &words()).is_err());
    }

    #[test]
    fn invoice_test() {
        let bolt11 = make_external_invoice(
            Network::Regtest,
            Some(5_000),
            [3; 32],
            InvoiceDescription::Direct("cli".into()),
            Duration::from_secs(1_700_000_000),
        );
        let value = decode_invoice(&bolt11).unwrap();
        assert_eq!(value["amount_msat"], json!(5_000));
        assert_eq!(value["payment_hash"], json!(hex::encode([3; 32])));
        assert!(decode_invoice("lnbc1garbage").is_err());
    }

    #[tokio::test]
    async fn input_test() {
        let value = classify_input(TEST_REGTEST_ADDRESS).await.unwrap();
        assert_eq!(value["type"], json!("bitcoinAddress"));
    }

    #[test]
    fn default_config_test() {
        let tempdir = tempfile::tempdir().unwrap();
        let dir = tempdir.path().join("sdk");
        let value =
            default_config("regtest", Some("key".into()), Some("inv".into()), dir.clone()).unwrap();
        assert_eq!(value["network"], json!("regtest"));
        assert!(dir.is_dir());
        assert!(default_config("mars", None, None, dir).is_err());
    }
}
