use core::str::FromStr;

use bitcoin::address::NetworkUnchecked;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Address, Amount, Denomination, Network};
use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SdkError, SdkResult};
use crate::invoice::{parse_invoice, LNInvoice};
use crate::lnurl::{
    response_error, LnUrlAuthRequestData, LnUrlErrorData, LnUrlPayRequestData,
    LnUrlWithdrawRequestData,
};
use crate::rest::RestClient;

/// A bitcoin address, possibly from a BIP21 URI
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinAddressData {
    /// The address
    pub address: String,
    /// Network the address is valid for
    pub network: Network,
    /// Requested amount
    pub amount_sat: Option<u64>,
    /// BIP21 label
    pub label: Option<String>,
    /// BIP21 message
    pub message: Option<String>,
}

/// What a piece of user input turned out to be
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputType {
    /// On-chain address or BIP21 URI without a lightning fallback
    BitcoinAddress {
        /// Details
        address: BitcoinAddressData,
    },
    /// BOLT-11 invoice
    Bolt11 {
        /// Decoded invoice
        invoice: LNInvoice,
    },
    /// Node id, for spontaneous payments
    NodeId {
        /// Hex node id
        node_id: String,
    },
    /// A URL which is not an LNURL
    Url {
        /// The URL
        url: String,
    },
    /// LNURL-pay
    LnUrlPay {
        /// Resolved parameters
        data: LnUrlPayRequestData,
    },
    /// LNURL-withdraw
    LnUrlWithdraw {
        /// Resolved parameters
        data: LnUrlWithdrawRequestData,
    },
    /// LNURL-auth
    LnUrlAuth {
        /// Decoded parameters
        data: LnUrlAuthRequestData,
    },
    /// The LNURL service answered with an error
    LnUrlError {
        /// Details
        data: LnUrlErrorData,
    },
}

const LNURL_SCHEMES: [&str; 3] = ["lnurlp", "lnurlw", "keyauth"];

/// Classify `input`, resolving LNURL endpoints through `rest`
pub async fn parse_input(input: &str, rest: &dyn RestClient) -> SdkResult<InputType> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SdkError::invalid_input("empty input"));
    }
    if let Some(address) = parse_address(input) {
        return Ok(InputType::BitcoinAddress { address });
    }
    if has_prefix(input, "bitcoin:") {
        return parse_bip21(input);
    }

    let input = strip_prefix(input, "lightning:").unwrap_or(input);
    if let Ok(invoice) = parse_invoice(input) {
        return Ok(InputType::Bolt11 { invoice });
    }
    if let Ok(node_id) = PublicKey::from_str(input) {
        return Ok(InputType::NodeId { node_id: node_id.to_string() });
    }
    if has_prefix(input, "lnurl1") {
        let url = decode_lnurl(input)?;
        return resolve_lnurl(url, None, rest).await;
    }
    if let Some((scheme, rest_of)) = input.split_once("://") {
        if LNURL_SCHEMES.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
            let url = parse_url(&format!("https://{}", rest_of))?;
            let url = if url.host_str().map_or(false, |h| h.ends_with(".onion")) {
                parse_url(&format!("http://{}", rest_of))?
            } else {
                url
            };
            return resolve_lnurl(url, None, rest).await;
        }
    }
    if let Some(url) = lightning_address_url(input) {
        return resolve_lnurl(url, Some(input.to_lowercase()), rest).await;
    }
    if let Ok(url) = Url::parse(input) {
        if url.scheme() == "http" || url.scheme() == "https" {
            return Ok(InputType::Url { url: input.to_string() });
        }
    }
    Err(SdkError::invalid_input(format!("unrecognized input {}", input)))
}

fn has_prefix(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len()).map_or(false, |p| p.eq_ignore_ascii_case(prefix))
}

fn strip_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if has_prefix(s, prefix) {
        s.get(prefix.len()..)
    } else {
        None
    }
}

fn parse_url(s: &str) -> SdkResult<Url> {
    Url::parse(s).map_err(|e| SdkError::invalid_input(format!("url {}: {}", s, e)))
}

fn parse_address(s: &str) -> Option<BitcoinAddressData> {
    let address = Address::<NetworkUnchecked>::from_str(s).ok()?;
    let network = [Network::Bitcoin, Network::Testnet, Network::Regtest]
        .into_iter()
        .find(|n| address.is_valid_for_network(*n))?;
    Some(BitcoinAddressData {
        address: address.assume_checked().to_string(),
        network,
        amount_sat: None,
        label: None,
        message: None,
    })
}

fn parse_bip21(uri: &str) -> SdkResult<InputType> {
    let body = strip_prefix(uri, "bitcoin:").unwrap_or(uri);
    let (address, query) = body.split_once('?').unwrap_or((body, ""));
    let mut data = parse_address(address)
        .ok_or_else(|| SdkError::invalid_input(format!("bad address in {}", uri)))?;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "amount" => {
                let amount = Amount::from_str_in(&value, Denomination::Bitcoin)
                    .map_err(|e| SdkError::invalid_input(format!("amount {}: {}", value, e)))?;
                data.amount_sat = Some(amount.to_sat());
            }
            "label" => data.label = Some(value.into_owned()),
            "message" => data.message = Some(value.into_owned()),
            "lightning" => {
                if let Ok(invoice) = parse_invoice(&value) {
                    return Ok(InputType::Bolt11 { invoice });
                }
            }
            other if other.starts_with("req-") => {
                return Err(SdkError::invalid_input(format!("unsupported parameter {}", other)))
            }
            _ => {}
        }
    }
    Ok(InputType::BitcoinAddress { address: data })
}

/// Decode a bech32 `lnurl1...` string into its URL
pub fn decode_lnurl(lnurl: &str) -> SdkResult<Url> {
    let (hrp, data) = bitcoin::bech32::decode(lnurl)
        .map_err(|e| SdkError::invalid_input(format!("lnurl: {}", e)))?;
    if hrp.to_lowercase() != "lnurl" {
        return Err(SdkError::invalid_input("lnurl: wrong prefix"));
    }
    let url = String::from_utf8(data)
        .map_err(|e| SdkError::invalid_input(format!("lnurl: {}", e)))?;
    parse_url(&url)
}

fn lightning_address_url(s: &str) -> Option<Url> {
    let (user, domain) = s.split_once('@')?;
    let user_ok = !user.is_empty()
        && user.chars().all(|c| c.is_ascii_alphanumeric() || "-_.+".contains(c));
    if !user_ok || !domain.contains('.') || domain.contains('@') {
        return None;
    }
    let scheme = if domain.ends_with(".onion") { "http" } else { "https" };
    Url::parse(&format!("{}://{}/.well-known/lnurlp/{}", scheme, domain, user.to_lowercase()))
        .ok()
}

#[derive(Deserialize)]
struct TaggedResponse {
    tag: Option<String>,
}

async fn resolve_lnurl(
    url: Url,
    ln_address: Option<String>,
    rest: &dyn RestClient,
) -> SdkResult<InputType> {
    let domain = url
        .host_str()
        .ok_or_else(|| SdkError::invalid_input(format!("lnurl without host: {}", url)))?
        .to_string();
    let query_param = |name: &str| {
        url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned())
    };

    if query_param("tag").as_deref() == Some("login") {
        let k1 = query_param("k1")
            .ok_or_else(|| SdkError::LnurlAuthError("missing k1".into()))?;
        if hex::decode(&k1).map_or(true, |k| k.len() != 32) {
            return Err(SdkError::LnurlAuthError("k1 must be 32 bytes of hex".into()));
        }
        let action = query_param("action");
        return Ok(InputType::LnUrlAuth {
            data: LnUrlAuthRequestData { k1, action, domain, url: url.to_string() },
        });
    }

    debug!("resolving lnurl {}", url);
    let (status, body) = rest.get(url.as_str()).await?;
    if let Some(data) = response_error(&body) {
        return Ok(InputType::LnUrlError { data });
    }
    if !(200..300).contains(&status) {
        return Err(SdkError::generic(format!("{} returned {}", url, status)));
    }
    let tagged: TaggedResponse = serde_json::from_str(&body)
        .map_err(|e| SdkError::generic(format!("bad lnurl response from {}: {}", domain, e)))?;
    match tagged.tag.as_deref() {
        Some("payRequest") => {
            let mut data: LnUrlPayRequestData = serde_json::from_str(&body)
                .map_err(|e| SdkError::generic(format!("bad pay request: {}", e)))?;
            if data.min_sendable > data.max_sendable {
                return Err(SdkError::generic("pay request with min above max"));
            }
            data.domain = domain;
            data.ln_address = ln_address;
            Ok(InputType::LnUrlPay { data })
        }
        Some("withdrawRequest") => {
            let data: LnUrlWithdrawRequestData = serde_json::from_str(&body)
                .map_err(|e| SdkError::generic(format!("bad withdraw request: {}", e)))?;
            if data.min_withdrawable > data.max_withdrawable {
                return Err(SdkError::generic("withdraw request with min above max"));
            }
            Ok(InputType::LnUrlWithdraw { data })
        }
        other => Err(SdkError::invalid_input(format!("unsupported lnurl tag {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::util::test_utils::*;

    const BOLT11: &str = "lnbc1pvjluezsp5zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3zygspp5qqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqqqsyqcyq5rqwzqfqypqdpl2pkx2ctnv5sxxmmwwd5kgetjypeh2ursdae8g6twvus8g6rfwvs8qun0dfjkxaq9qrsgq357wnc5r2ueh7ck6q93dj32dlqnls087fxdwk8qakdyafkq3yap9us6v52vjjsrvywa6rt52cm9r9zqt8r2t7mlcwspyetp5h2tztugp9lfyql";
    const MAINNET_ADDRESS: &str = "bc1qzyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3h8ffkz";

    #[tokio::test]
    async fn address_test() {
        let rest = MockRestClient::new();
        match parse_input(MAINNET_ADDRESS, &rest).await.unwrap() {
            InputType::BitcoinAddress { address } => {
                assert_eq!(address.network, Network::Bitcoin);
                assert_eq!(address.amount_sat, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse_input(TEST_REGTEST_ADDRESS, &rest).await.unwrap() {
            InputType::BitcoinAddress { address } => assert_eq!(address.network, Network::Regtest),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn bip21_test() {
        let rest = MockRestClient::new();
        let uri = format!("bitcoin:{}?amount=0.0005&label=Coffee%20shop&message=latte", MAINNET_ADDRESS);
        match parse_input(&uri, &rest).await.unwrap() {
            InputType::BitcoinAddress { address } => {
                assert_eq!(address.address, MAINNET_ADDRESS);
                assert_eq!(address.amount_sat, Some(50_000));
                assert_eq!(address.label.as_deref(), Some("Coffee shop"));
                assert_eq!(address.message.as_deref(), Some("latte"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let unified = format!("BITCOIN:{}?lightning={}", MAINNET_ADDRESS, BOLT11);
        assert!(matches!(parse_input(&unified, &rest).await.unwrap(), InputType::Bolt11 { .. }));

        let required = format!("bitcoin:{}?req-somethingnew=1", MAINNET_ADDRESS);
        assert_eq!(parse_input(&required, &rest).await.unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn bolt11_and_node_id_test() {
        let rest = MockRestClient::new();
        assert!(matches!(parse_input(BOLT11, &rest).await.unwrap(), InputType::Bolt11 { .. }));
        let prefixed = format!("lightning:{}", BOLT11);
        assert!(matches!(parse_input(&prefixed, &rest).await.unwrap(), InputType::Bolt11 { .. }));

        let node_id = test_pubkey(1);
        assert_eq!(
            parse_input(&node_id, &rest).await.unwrap(),
            InputType::NodeId { node_id: node_id.clone() }
        );
    }

    #[tokio::test]
    async fn url_test() {
        let rest = MockRestClient::new();
        assert_eq!(
            parse_input("https://example.com/shop", &rest).await.unwrap(),
            InputType::Url { url: "https://example.com/shop".into() }
        );
        assert!(rest.calls().is_empty());
        assert_eq!(parse_input("  ", &rest).await.unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(parse_input("hello", &rest).await.unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn decode_lnurl_test() {
        let url = decode_lnurl("LNURL1DP68GURN8GHJ7UM9WFMXJCM99E3K7MF0V9CXJ0M385EKVCENXC6R2C35XVUKXEFCV5MKVV34X5EKZD3EV56NYD3HXQURZEPEXEJXXEPNXSCRVWFNV9NXZCN9XQ6XYEFHVGCXXCMYXYMNSERXFQ5FNS").unwrap();
        assert_eq!(
            url.as_str(),
            "https://service.com/api?q=3fc3645b439ce8e7f2553a69e5267081d96dcd340693afabe04be7b0ccd178df"
        );
    }

    #[tokio::test]
    async fn lnurl_pay_test() {
        let rest = MockRestClient::new();
        rest.add_response(
            "https://lnurl.example.com/lnurlp/coffee",
            200,
            r#"{"tag":"payRequest","callback":"https://lnurl.example.com/cb","minSendable":1000,"maxSendable":5000000,"metadata":"[[\"text/plain\",\"coffee\"]]","commentAllowed":32}"#,
        );
        let input = "lnurl1dp68gurn8ghj7mrww4exctn90psk6urvv5hxxmmd9akxuatjd3cz7cm0venx2eg3v9jmj";
        match parse_input(input, &rest).await.unwrap() {
            InputType::LnUrlPay { data } => {
                assert_eq!(data.domain, "lnurl.example.com");
                assert_eq!(data.max_sendable, 5_000_000);
                assert_eq!(data.comment_allowed, 32);
                assert_eq!(data.ln_address, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse_input("lnurlp://lnurl.example.com/lnurlp/coffee", &rest).await.unwrap() {
            InputType::LnUrlPay { data } => assert_eq!(data.callback, "https://lnurl.example.com/cb"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn lightning_address_test() {
        let rest = MockRestClient::new();
        rest.add_response(
            "https://wallet.example.com/.well-known/lnurlp/alice",
            200,
            r#"{"tag":"payRequest","callback":"https://wallet.example.com/cb","minSendable":1000,"maxSendable":5000000,"metadata":"[]"}"#,
        );
        match parse_input("Alice@wallet.example.com", &rest).await.unwrap() {
            InputType::LnUrlPay { data } => {
                assert_eq!(data.ln_address.as_deref(), Some("alice@wallet.example.com"));
                assert_eq!(data.comment_allowed, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn lnurl_withdraw_and_error_test() {
        let rest = MockRestClient::new();
        rest.add_response(
            "https://faucet.example.com/w",
            200,
            r#"{"tag":"withdrawRequest","callback":"https://faucet.example.com/cb","k1":"k","defaultDescription":"faucet","minWithdrawable":1000,"maxWithdrawable":2000}"#,
        );
        rest.add_response("https://closed.example.com/w", 200, r#"{"status":"ERROR","reason":"closed"}"#);
        match parse_input("lnurlw://faucet.example.com/w", &rest).await.unwrap() {
            InputType::LnUrlWithdraw { data } => {
                assert_eq!(data.k1, "k");
                assert_eq!(data.max_withdrawable, 2000);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            parse_input("lnurlw://closed.example.com/w", &rest).await.unwrap(),
            InputType::LnUrlError { data: LnUrlErrorData { reason: "closed".into() } }
        );
    }

    #[tokio::test]
    async fn lnurl_auth_test() {
        let rest = MockRestClient::new();
        let k1 = "e2af6254a8df433264fa23f67eb8188635d15ce883e8fc020989d5f82ae6f11e";
        let input = format!("keyauth://site.com/login?tag=login&k1={}&action=login", k1);
        match parse_input(&input, &rest).await.unwrap() {
            InputType::LnUrlAuth { data } => {
                assert_eq!(data.k1, k1);
                assert_eq!(data.domain, "site.com");
                assert_eq!(data.action.as_deref(), Some("login"));
                assert!(data.url.starts_with("https://site.com/login"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(rest.calls().is_empty());

        let bad = "keyauth://site.com/login?tag=login&k1=00";
        assert_eq!(parse_input(bad, &rest).await.unwrap_err().kind(), ErrorKind::LnurlAuthError);
    }
}
