use bitcoin::secp256k1::{Message, PublicKey};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SdkError, SdkResult};
use crate::invoice::{parse_invoice, InvoiceDescription};
use crate::model::{LnurlPaymentInfo, Payment, PaymentStatus, PaymentType};
use crate::payments::{sat_to_msat, ReceiveRequest};
use crate::session::Session;
use crate::util::crypto_utils::sha256;

/// Longest message or description a success action may carry
pub const MAX_SUCCESS_ACTION_TEXT_LEN: usize = 144;

/// LNURL-pay parameters (LUD-06)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LnUrlPayRequestData {
    /// Where to request the invoice
    pub callback: String,
    /// Smallest amount, in msat
    pub min_sendable: u64,
    /// Largest amount, in msat
    pub max_sendable: u64,
    /// Metadata, a JSON array encoded as string
    #[serde(rename = "metadata")]
    pub metadata_str: String,
    /// Longest comment accepted, zero if comments are not accepted
    #[serde(default)]
    pub comment_allowed: u16,
    /// Domain of the service
    #[serde(default)]
    pub domain: String,
    /// Lightning address this request was resolved from
    #[serde(default)]
    pub ln_address: Option<String>,
}

/// LNURL-withdraw parameters (LUD-03)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LnUrlWithdrawRequestData {
    /// Where to send the invoice
    pub callback: String,
    /// Session token
    pub k1: String,
    /// Description for the invoice
    #[serde(default)]
    pub default_description: String,
    /// Smallest amount, in msat
    pub min_withdrawable: u64,
    /// Largest amount, in msat
    pub max_withdrawable: u64,
}

/// LNURL-auth parameters (LUD-04)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnUrlAuthRequestData {
    /// Challenge, hex
    pub k1: String,
    /// Optional action, e.g. `login`
    pub action: Option<String>,
    /// Domain the linking key is derived for
    pub domain: String,
    /// The full LNURL-auth URL
    pub url: String,
}

/// Error returned by an LNURL service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnUrlErrorData {
    /// Reason given by the service
    pub reason: String,
}

/// Result of an LNURL callback
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LnUrlCallbackStatus {
    /// The service accepted the request
    Ok,
    /// The service refused the request
    ErrorStatus {
        /// Details
        data: LnUrlErrorData,
    },
}

/// LNURL-pay success action (LUD-09)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "lowercase")]
pub enum SuccessAction {
    /// Show a message
    Message {
        /// Text
        message: String,
    },
    /// Offer a link
    Url {
        /// Text
        description: String,
        /// Link, on the service domain
        url: String,
    },
    /// A message encrypted with the payment preimage, passed through undecrypted
    Aes {
        /// Text
        description: String,
        /// Base64 ciphertext
        ciphertext: String,
        /// Base64 IV
        iv: String,
    },
}

impl SuccessAction {
    fn validate(&self, domain: &str) -> SdkResult<()> {
        let too_long = |s: &str| s.chars().count() > MAX_SUCCESS_ACTION_TEXT_LEN;
        match self {
            SuccessAction::Message { message } if too_long(message) => {
                Err(SdkError::invalid_input("success action message too long"))
            }
            SuccessAction::Url { description, url } => {
                if too_long(description) {
                    return Err(SdkError::invalid_input("success action description too long"));
                }
                let host = Url::parse(url)
                    .map_err(|e| SdkError::invalid_input(format!("success action url: {}", e)))?
                    .host_str()
                    .map(str::to_string);
                if host.as_deref() != Some(domain) {
                    return Err(SdkError::invalid_input("success action url on a foreign domain"));
                }
                Ok(())
            }
            SuccessAction::Aes { description, iv, .. } => {
                if too_long(description) || iv.len() != 24 {
                    return Err(SdkError::invalid_input("malformed aes success action"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Result of an LNURL-pay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum LnUrlPayResult {
    /// Paid
    EndpointSuccess {
        /// The payment
        payment: Payment,
        /// What the service wants shown
        success_action: Option<SuccessAction>,
    },
    /// The service refused to issue an invoice
    EndpointError {
        /// Details
        data: LnUrlErrorData,
    },
    /// The invoice could not be paid
    PayError {
        /// Payment hash, hex
        payment_hash: String,
        /// Failure reason
        reason: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayCallbackResponse {
    pr: String,
    #[serde(default)]
    success_action: Option<SuccessAction>,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: Option<String>,
    reason: Option<String>,
}

/// The service error in an LNURL response, if it is one
pub(crate) fn response_error(body: &str) -> Option<LnUrlErrorData> {
    let response: StatusResponse = serde_json::from_str(body).ok()?;
    match response.status.as_deref() {
        Some(s) if s.eq_ignore_ascii_case("ERROR") => {
            Some(LnUrlErrorData { reason: response.reason.unwrap_or_default() })
        }
        _ => None,
    }
}

fn parse_callback_status(body: &str) -> SdkResult<LnUrlCallbackStatus> {
    let response: StatusResponse = serde_json::from_str(body)
        .map_err(|e| SdkError::generic(format!("bad lnurl response: {}", e)))?;
    match response.status.as_deref() {
        Some(s) if s.eq_ignore_ascii_case("OK") => Ok(LnUrlCallbackStatus::Ok),
        Some(s) if s.eq_ignore_ascii_case("ERROR") => Ok(LnUrlCallbackStatus::ErrorStatus {
            data: LnUrlErrorData { reason: response.reason.unwrap_or_default() },
        }),
        other => Err(SdkError::generic(format!("unexpected lnurl status {:?}", other))),
    }
}

fn with_query(base: &str, params: &[(&str, &str)]) -> SdkResult<String> {
    let mut url = Url::parse(base)
        .map_err(|e| SdkError::invalid_input(format!("lnurl callback {}: {}", base, e)))?;
    {
        let mut query = url.query_pairs_mut();
        for (k, v) in params {
            query.append_pair(k, v);
        }
    }
    Ok(url.to_string())
}

/// Check amount and comment against the service limits, without network access
pub fn validate_pay_request(
    req: &LnUrlPayRequestData,
    amount_msat: u64,
    comment: Option<&str>,
) -> SdkResult<()> {
    if amount_msat < req.min_sendable || amount_msat > req.max_sendable {
        return Err(SdkError::AmountOutOfRange(format!(
            "{} msat outside {}..={}",
            amount_msat, req.min_sendable, req.max_sendable
        )));
    }
    if let Some(comment) = comment {
        if comment.chars().count() > req.comment_allowed as usize {
            return Err(SdkError::invalid_input(format!(
                "comment longer than {} characters",
                req.comment_allowed
            )));
        }
    }
    Ok(())
}

impl Session {
    /// Authenticate to an LNURL-auth service with the domain linking key
    pub async fn lnurl_auth(&self, req: &LnUrlAuthRequestData) -> SdkResult<LnUrlCallbackStatus> {
        self.ensure_connected()?;
        let k1: [u8; 32] = hex::decode(&req.k1)
            .ok()
            .and_then(|k1| k1.try_into().ok())
            .ok_or_else(|| SdkError::LnurlAuthError("k1 must be 32 bytes of hex".into()))?;
        let secp_ctx = self.keys.secp_ctx();
        let linking_key = self.keys.lnurl_auth_linking_key(&req.domain)?;
        let linking_pubkey = PublicKey::from_secret_key(secp_ctx, &linking_key);
        let sig = secp_ctx.sign_ecdsa(&Message::from_digest(k1), &linking_key);
        let sig_hex = hex::encode(sig.serialize_der());
        let key_hex = linking_pubkey.to_string();
        let url = with_query(&req.url, &[("sig", sig_hex.as_str()), ("key", key_hex.as_str())])
        .map_err(|e| SdkError::LnurlAuthError(e.to_string()))?;

        let (status, body) = match self.net("lnurl auth", self.services.rest_client.get(&url)).await
        {
            Ok(response) => response,
            Err(e @ SdkError::NetworkTimeout(_)) => return Err(e),
            Err(e) => return Err(SdkError::LnurlAuthError(e.to_string())),
        };
        if !(200..300).contains(&status) {
            return Err(SdkError::LnurlAuthError(format!("{} returned {}", req.domain, status)));
        }
        let result =
            parse_callback_status(&body).map_err(|e| SdkError::LnurlAuthError(e.to_string()))?;
        info!("lnurl auth to {}: {:?}", req.domain, result);
        Ok(result)
    }

    /// Pay an LNURL-pay service `amount_sat`
    pub async fn pay_lnurl(
        &self,
        req: &LnUrlPayRequestData,
        amount_sat: u64,
        comment: Option<String>,
    ) -> SdkResult<LnUrlPayResult> {
        self.ensure_connected()?;
        let amount_msat = sat_to_msat(amount_sat)?;
        validate_pay_request(req, amount_msat, comment.as_deref())?;

        let amount = amount_msat.to_string();
        let mut params = vec![("amount", amount.as_str())];
        if let Some(comment) = comment.as_deref() {
            params.push(("comment", comment));
        }
        let url = with_query(&req.callback, &params)?;
        let (status, body) =
            self.net("lnurl pay callback", self.services.rest_client.get(&url)).await?;
        if let Some(data) = response_error(&body) {
            return Ok(LnUrlPayResult::EndpointError { data });
        }
        if !(200..300).contains(&status) {
            return Err(SdkError::generic(format!("{} returned {}", req.domain, status)));
        }
        let response: PayCallbackResponse = serde_json::from_str(&body)
            .map_err(|e| SdkError::generic(format!("bad lnurl pay response: {}", e)))?;

        let invoice = parse_invoice(&response.pr)
            .map_err(|e| SdkError::InvoiceMismatch(e.to_string()))?;
        if invoice.amount_msat != Some(amount_msat) {
            return Err(SdkError::InvoiceMismatch(format!(
                "invoice amount {:?}, requested {}",
                invoice.amount_msat, amount_msat
            )));
        }
        if invoice.description_hash.as_deref() != Some(&hex::encode(sha256(req.metadata_str.as_bytes())))
        {
            return Err(SdkError::InvoiceMismatch("description hash does not match metadata".into()));
        }
        if let Some(action) = response.success_action.as_ref() {
            action.validate(&req.domain)?;
        }

        let lnurl_info = LnurlPaymentInfo {
            lnurl_pay_domain: Some(req.domain.clone()),
            ln_address: req.ln_address.clone(),
            lnurl_metadata: Some(req.metadata_str.clone()),
            lnurl_comment: comment,
            lnurl_success_action: response
                .success_action
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
            lnurl_withdraw_endpoint: None,
        };
        let _guard = self.lock_op().await?;
        match self.send_payment_locked(&invoice.bolt11, None, Some(lnurl_info)).await {
            Ok(payment) => Ok(LnUrlPayResult::EndpointSuccess {
                payment,
                success_action: response.success_action,
            }),
            Err(
                e @ (SdkError::RouteNotFound(_)
                | SdkError::InsufficientFunds(_)
                | SdkError::NetworkTimeout(_)
                | SdkError::Generic(_)),
            ) => {
                warn!("lnurl payment to {} failed: {}", req.domain, e);
                Ok(LnUrlPayResult::PayError {
                    payment_hash: invoice.payment_hash,
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Withdraw `amount_sat` from an LNURL-withdraw service
    pub async fn withdraw_lnurl(
        &self,
        req: &LnUrlWithdrawRequestData,
        amount_sat: u64,
        description: Option<String>,
    ) -> SdkResult<LnUrlCallbackStatus> {
        self.ensure_connected()?;
        let amount_msat = sat_to_msat(amount_sat)?;
        if amount_msat == 0
            || amount_msat < req.min_withdrawable
            || amount_msat > req.max_withdrawable
        {
            return Err(SdkError::AmountOutOfRange(format!(
                "{} msat outside {}..={}",
                amount_msat, req.min_withdrawable, req.max_withdrawable
            )));
        }
        let description = description.unwrap_or_else(|| req.default_description.clone());

        let invoice = {
            let _guard = self.lock_op().await?;
            let (invoice, _) = self
                .create_receive_invoice(ReceiveRequest {
                    amount_msat,
                    description: InvoiceDescription::Direct(description.clone()),
                    preimage: None,
                })
                .await?;
            self.services.persister.insert_or_update_payments(&[Payment {
                id: invoice.payment_hash.clone(),
                payment_type: PaymentType::Received,
                payment_time: self.services.clock.now_secs(),
                amount_msat,
                fee_msat: 0,
                status: PaymentStatus::Pending,
                error: None,
                description: Some(description),
                destination_pubkey: self.node_id().to_string(),
                bolt11: Some(invoice.bolt11.clone()),
                payment_preimage: None,
                keysend: false,
                lnurl_info: Some(LnurlPaymentInfo {
                    lnurl_withdraw_endpoint: Some(req.callback.clone()),
                    ..Default::default()
                }),
                swap_address: None,
                reverse_swap_id: None,
            }])?;
            invoice
        };

        let url = with_query(
            &req.callback,
            &[("k1", req.k1.as_str()), ("pr", invoice.bolt11.as_str())],
        )?;
        let (status, body) =
            self.net("lnurl withdraw callback", self.services.rest_client.get(&url)).await?;
        if let Some(data) = response_error(&body) {
            return Ok(LnUrlCallbackStatus::ErrorStatus { data });
        }
        if !(200..300).contains(&status) {
            return Err(SdkError::generic(format!("withdraw callback returned {}", status)));
        }
        parse_callback_status(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::session::NodeSession;
    use crate::util::test_utils::*;
    use bitcoin::secp256k1::ecdsa::Signature;
    use std::str::FromStr;

    const METADATA: &str = r#"[["text/plain","coffee"]]"#;
    const CALLBACK: &str = "https://lnurl.example.com/pay/cb";

    fn pay_request() -> LnUrlPayRequestData {
        LnUrlPayRequestData {
            callback: CALLBACK.into(),
            min_sendable: 1_000,
            max_sendable: 100_000_000,
            metadata_str: METADATA.into(),
            comment_allowed: 10,
            domain: "lnurl.example.com".into(),
            ln_address: None,
        }
    }

    #[test]
    fn success_action_test() {
        let ok = SuccessAction::Url {
            description: "receipt".into(),
            url: "https://lnurl.example.com/r/1".into(),
        };
        ok.validate("lnurl.example.com").unwrap();
        assert!(ok.validate("other.com").is_err());
        let long = SuccessAction::Message { message: "x".repeat(145) };
        assert!(long.validate("lnurl.example.com").is_err());
        let action: SuccessAction =
            serde_json::from_str(r#"{"tag":"message","message":"thanks"}"#).unwrap();
        assert_eq!(action, SuccessAction::Message { message: "thanks".into() });
    }

    #[test]
    fn callback_status_test() {
        assert_eq!(parse_callback_status(r#"{"status":"OK"}"#).unwrap(), LnUrlCallbackStatus::Ok);
        assert_eq!(
            parse_callback_status(r#"{"status":"ERROR","reason":"used"}"#).unwrap(),
            LnUrlCallbackStatus::ErrorStatus { data: LnUrlErrorData { reason: "used".into() } }
        );
        assert!(parse_callback_status("<html>").is_err());
    }

    #[tokio::test]
    async fn pay_out_of_range_test() {
        let env = TestEnv::new();
        env.node.set_balances(1_000_000_000, 0, 0);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let req = LnUrlPayRequestData { min_sendable: 5_000_000, max_sendable: 10_000_000, ..pay_request() };
        let err = session.pay_lnurl(&req, 1, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmountOutOfRange);
        let err = session.pay_lnurl(&req, 10_001, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmountOutOfRange);
        assert!(env.rest.calls().is_empty());

        let err = session.pay_lnurl(&pay_request(), 5, Some("x".repeat(11))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(env.rest.calls().is_empty());
    }

    #[tokio::test]
    async fn pay_test() {
        let env = TestEnv::new();
        env.node.set_balances(1_000_000_000, 0, 0);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let pr = env.external_invoice_with_hash(Some(2_000_000), sha256(METADATA.as_bytes()));
        env.rest.add_response(
            CALLBACK,
            200,
            &serde_json::json!({
                "pr": pr,
                "routes": [],
                "successAction": {"tag": "message", "message": "thanks"},
            })
            .to_string(),
        );
        let result = session.pay_lnurl(&pay_request(), 2_000, Some("hi".into())).await.unwrap();
        let payment = match result {
            LnUrlPayResult::EndpointSuccess { payment, success_action } => {
                assert_eq!(success_action, Some(SuccessAction::Message { message: "thanks".into() }));
                payment
            }
            other => panic!("unexpected {:?}", other),
        };
        let info = payment.lnurl_info.unwrap();
        assert_eq!(info.lnurl_pay_domain.as_deref(), Some("lnurl.example.com"));
        assert_eq!(info.lnurl_comment.as_deref(), Some("hi"));
        let calls = env.rest.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with(CALLBACK));
        assert!(calls[0].contains("amount=2000000"));
        assert!(calls[0].contains("comment=hi"));
    }

    #[tokio::test]
    async fn pay_mismatch_test() {
        let env = TestEnv::new();
        env.node.set_balances(1_000_000_000, 0, 0);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let pr = env.external_invoice_with_hash(Some(3_000_000), sha256(METADATA.as_bytes()));
        env.rest.add_response(CALLBACK, 200, &serde_json::json!({ "pr": pr }).to_string());
        let err = session.pay_lnurl(&pay_request(), 2_000, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvoiceMismatch);
        assert!(session.list_payments(crate::model::PaymentTypeFilter::All, None, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn pay_endpoint_error_test() {
        let env = TestEnv::new();
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        env.rest.add_response(CALLBACK, 200, r#"{"status":"ERROR","reason":"closed"}"#);
        let result = session.pay_lnurl(&pay_request(), 2_000, None).await.unwrap();
        assert_eq!(
            result,
            LnUrlPayResult::EndpointError { data: LnUrlErrorData { reason: "closed".into() } }
        );
    }

    #[tokio::test]
    async fn withdraw_test() {
        let env = TestEnv::new();
        env.node.set_balances(0, 0, 100_000_000);
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let req = LnUrlWithdrawRequestData {
            callback: "https://faucet.example.com/withdraw".into(),
            k1: "abcd".into(),
            default_description: "faucet".into(),
            min_withdrawable: 1_000,
            max_withdrawable: 50_000_000,
        };
        let err = session.withdraw_lnurl(&req, 60_000, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmountOutOfRange);
        assert!(env.rest.calls().is_empty());

        env.rest.add_response("https://faucet.example.com/withdraw", 200, r#"{"status":"OK"}"#);
        let status = session.withdraw_lnurl(&req, 10_000, None).await.unwrap();
        assert_eq!(status, LnUrlCallbackStatus::Ok);
        let calls = env.rest.calls();
        assert!(calls[0].contains("k1=abcd"));
        assert!(calls[0].contains("pr=lnbcrt"));
        let pending = session.list_payments(crate::model::PaymentTypeFilter::Received, None, None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].lnurl_info.as_ref().unwrap().lnurl_withdraw_endpoint.as_deref(),
            Some("https://faucet.example.com/withdraw")
        );
    }

    #[tokio::test]
    async fn auth_test() {
        let env = TestEnv::new();
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let k1 = "e2af6254a8df433264fa23f67eb8188635d15ce883e8fc020989d5f82ae6f11e";
        let req = LnUrlAuthRequestData {
            k1: k1.into(),
            action: Some("login".into()),
            domain: "site.com".into(),
            url: format!("https://site.com/auth?tag=login&k1={}", k1),
        };
        env.rest.add_response("https://site.com/auth", 200, r#"{"status":"OK"}"#);
        assert_eq!(session.lnurl_auth(&req).await.unwrap(), LnUrlCallbackStatus::Ok);

        let call = Url::parse(&env.rest.calls()[0]).unwrap();
        let param = |name: &str| {
            call.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.to_string()).unwrap()
        };
        let key = PublicKey::from_str(&param("key")).unwrap();
        let sig = Signature::from_der(&hex::decode(param("sig")).unwrap()).unwrap();
        let msg = Message::from_digest(hex::decode(k1).unwrap().try_into().unwrap());
        session.keys.secp_ctx().verify_ecdsa(&msg, &sig, &key).unwrap();

        let bad = LnUrlAuthRequestData { k1: "abcd".into(), ..req.clone() };
        assert_eq!(session.lnurl_auth(&bad).await.unwrap_err().kind(), ErrorKind::LnurlAuthError);
        let unreachable = LnUrlAuthRequestData { url: "https://down.com/auth?k1=1".into(), ..req };
        assert_eq!(
            session.lnurl_auth(&unreachable).await.unwrap_err().kind(),
            ErrorKind::LnurlAuthError
        );
    }
}
