use async_trait::async_trait;
use log::info;

use crate::error::{SdkError, SdkResult};
use crate::invoice::{RouteHint, RouteHintHop};
use crate::model::{LspInformation, PaymentInformation};
use crate::session::Session;
use crate::SendSync;

/// Short channel id of a channel the LSP opens just in time, `1x0x0`
pub const LSP_JIT_SHORT_CHANNEL_ID: u64 = 1 << 40;

/// Lightning Service Provider directory
#[async_trait]
pub trait LspAPI: SendSync {
    /// LSPs available to `node_pubkey`
    async fn list_lsps(&self, node_pubkey: String) -> SdkResult<Vec<LspInformation>>;
    /// Ask the LSP to open a channel when `payment_info` arrives
    async fn register_payment(
        &self,
        lsp_id: String,
        lsp_pubkey: String,
        payment_info: PaymentInformation,
    ) -> SdkResult<()>;
}

impl LspInformation {
    /// Route hint through a just-in-time channel from this LSP
    pub fn jit_route_hint(&self) -> RouteHint {
        RouteHint {
            hops: vec![RouteHintHop {
                src_node_id: self.pubkey.clone(),
                short_channel_id: LSP_JIT_SHORT_CHANNEL_ID,
                fees_base_msat: self.base_fee_msat as u32,
                fees_proportional_millionths: (self.fee_rate * 1_000_000.0).round() as u32,
                cltv_expiry_delta: self.time_lock_delta as u64,
                htlc_minimum_msat: Some(self.min_htlc_msat),
                htlc_maximum_msat: None,
            }],
        }
    }
}

impl Session {
    /// Discover LSPs
    pub async fn list_lsps(&self) -> SdkResult<Vec<LspInformation>> {
        self.ensure_connected()?;
        let lsps = self
            .net("list lsps", self.services.lsp_api.list_lsps(self.node_id().to_string()))
            .await?;
        *self.lsp_cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(lsps.clone());
        Ok(lsps)
    }

    async fn known_lsps(&self) -> SdkResult<Vec<LspInformation>> {
        let cached = self.lsp_cache.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match cached {
            Some(lsps) => Ok(lsps),
            None => self.list_lsps().await,
        }
    }

    /// Details of one LSP, `None` if it is not offered
    pub async fn fetch_lsp_info(&self, lsp_id: &str) -> SdkResult<Option<LspInformation>> {
        self.ensure_connected()?;
        Ok(self.known_lsps().await?.into_iter().find(|lsp| lsp.id == lsp_id))
    }

    /// Select an LSP and connect to it as a peer
    pub async fn connect_lsp(&self, lsp_id: &str) -> SdkResult<()> {
        let _guard = self.lock_op().await?;
        let lsp = self
            .list_lsps()
            .await?
            .into_iter()
            .find(|lsp| lsp.id == lsp_id)
            .ok_or_else(|| SdkError::UnknownLsp(lsp_id.to_string()))?;
        self.net(
            "connect lsp",
            self.services.node_api.connect_peer(lsp.pubkey.clone(), lsp.host.clone()),
        )
        .await?;
        self.services.persister.set_lsp_id(&lsp.id)?;
        self.mark_backup_pending();
        info!("selected lsp {} ({})", lsp.id, lsp.name);
        Ok(())
    }

    /// Id of the selected LSP
    pub fn lsp_id(&self) -> SdkResult<Option<String>> {
        self.ensure_connected()?;
        Ok(self.services.persister.get_lsp_id()?)
    }

    /// The selected LSP, if any
    pub(crate) async fn active_lsp(&self) -> SdkResult<Option<LspInformation>> {
        let lsp_id = match self.services.persister.get_lsp_id()? {
            Some(id) => id,
            None => return Ok(None),
        };
        match self.known_lsps().await?.into_iter().find(|lsp| lsp.id == lsp_id) {
            Some(lsp) => Ok(Some(lsp)),
            None => Err(SdkError::UnknownLsp(lsp_id)),
        }
    }

    /// Cooperatively close all channels with the selected LSP
    pub async fn close_lsp_channels(&self) -> SdkResult<()> {
        let _guard = self.lock_op().await?;
        let lsp = self
            .active_lsp()
            .await?
            .ok_or_else(|| SdkError::UnknownLsp("no lsp selected".into()))?;
        let txids = self
            .net("close lsp channels", self.services.node_api.close_peer_channels(lsp.pubkey.clone()))
            .await?;
        info!("closing {} channels with lsp {}: {:?}", txids.len(), lsp.id, txids);
        self.sync_locked().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::session::NodeSession;
    use crate::util::test_utils::*;

    #[tokio::test]
    async fn connect_lsp_test() {
        let env = TestEnv::new();
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        assert_eq!(session.lsp_id().unwrap(), None);
        let lsps = session.list_lsps().await.unwrap();
        assert_eq!(lsps.len(), 2);

        let err = session.connect_lsp("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownLsp);
        assert_eq!(session.lsp_id().unwrap(), None);

        session.connect_lsp(TEST_LSP_ID).await.unwrap();
        assert_eq!(session.lsp_id().unwrap().as_deref(), Some(TEST_LSP_ID));
        assert!(env.node.peers().contains(&lsps[0].pubkey));

        let info = session.fetch_lsp_info(TEST_LSP_ID).await.unwrap().unwrap();
        assert_eq!(info.id, TEST_LSP_ID);
        assert_eq!(session.fetch_lsp_info("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn default_lsp_test() {
        let env = TestEnv::new();
        let mut config = env.config();
        config.default_lsp_id = Some(TEST_LSP_ID.into());
        let node_session = NodeSession::new();
        let session = node_session.connect(config, env.seed(), env.services()).await.unwrap();
        assert_eq!(session.lsp_id().unwrap().as_deref(), Some(TEST_LSP_ID));
    }

    #[tokio::test]
    async fn close_lsp_channels_test() {
        let env = TestEnv::new();
        let node_session = NodeSession::new();
        let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
        let err = session.close_lsp_channels().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownLsp);

        session.connect_lsp(TEST_LSP_ID).await.unwrap();
        env.node.set_balances(10_000_000, 0, 0);
        env.node.set_channel_count(1);
        session.sync().await.unwrap();
        session.close_lsp_channels().await.unwrap();
        let state = session.node_info().unwrap();
        assert_eq!(state.channel_count, 0);
        assert_eq!(state.channels_balance_msat, 0);
        assert_eq!(state.onchain_balance_msat, 10_000_000);
    }

    #[test]
    fn jit_route_hint_test() {
        let lsp = make_test_lsp(TEST_LSP_ID, &test_pubkey(5));
        let hint = lsp.jit_route_hint();
        assert_eq!(hint.hops[0].short_channel_id, LSP_JIT_SHORT_CHANNEL_ID);
        assert_eq!(hint.hops[0].src_node_id, lsp.pubkey);
        assert_eq!(hint.hops[0].fees_proportional_millionths, 10);
    }
}
