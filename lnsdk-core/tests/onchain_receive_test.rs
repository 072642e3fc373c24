use lnsdk::error::ErrorKind;
use lnsdk::model::{PaymentStatus, PaymentType, PaymentTypeFilter, SwapStatus};
use lnsdk::seed::derive_seed;
use lnsdk::session::{NodeSession, SessionState};
use lnsdk::util::test_utils::*;

#[test]
fn derive_seed_is_deterministic() {
    let a = derive_seed(TEST_MNEMONIC).unwrap();
    let b = derive_seed(TEST_MNEMONIC).unwrap();
    assert_eq!(a.as_bytes(), b.as_bytes());
    assert_eq!(a.as_bytes().len(), 64);
}

#[test_log::test(tokio::test)]
async fn receive_onchain_through_lsp() {
    let env = TestEnv::new();
    let node_session = NodeSession::new();
    let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
    assert_eq!(node_session.state().await, SessionState::Connected);

    let info = session.node_info().unwrap();
    assert_eq!(info.channels_balance_msat, 0);
    assert_eq!(info.onchain_balance_msat, 0);
    assert_eq!(info.id, session.node_id());

    session.connect_lsp(TEST_LSP_ID).await.unwrap();
    let swap = session.receive_onchain().await.unwrap();
    assert_eq!(swap.status, SwapStatus::Initial);
    assert!(swap.bitcoin_address.starts_with("bcrt1q"));

    env.chain.fund_address(&swap.bitcoin_address, 50_000, Some(env.chain.tip()));
    session.sync().await.unwrap();
    let redeeming = session.in_progress_swap().unwrap().unwrap();
    assert_eq!(redeeming.status, SwapStatus::Redeemable);
    assert_eq!(redeeming.confirmed_sats, 50_000);
    assert_eq!(redeeming.last_redeem_error, None);
    assert_eq!(env.swapper.completed().len(), 1);

    // the payment shows up on the next pull
    session.sync().await.unwrap();
    assert_eq!(session.in_progress_swap().unwrap(), None);
    let received = session.list_payments(PaymentTypeFilter::Received, None, None).unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payment_type, PaymentType::Received);
    assert_eq!(received[0].status, PaymentStatus::Complete);
    assert_eq!(received[0].swap_address.as_deref(), Some(swap.bitcoin_address.as_str()));

    // 50k sat less the 2k sat channel opening fee
    let info = session.node_info().unwrap();
    assert_eq!(info.channels_balance_msat, 48_000_000);
    assert_eq!(info.balance_sat(), 48_000);
    assert_eq!(info.channel_count, 1);

    node_session.disconnect().await.unwrap();
}

#[tokio::test]
async fn connect_lifecycle() {
    let env = TestEnv::new();
    let node_session = NodeSession::new();
    let session = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();

    let err = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyConnected);

    node_session.disconnect().await.unwrap();
    assert_eq!(node_session.state().await, SessionState::Disconnected);
    assert_eq!(session.node_info().unwrap_err().kind(), ErrorKind::NotConnected);
    assert_eq!(session.sync().await.unwrap_err().kind(), ErrorKind::NotConnected);
    assert_eq!(node_session.disconnect().await.unwrap_err().kind(), ErrorKind::NotConnected);

    // the slot can be reused
    let again = node_session.connect(env.config(), env.seed(), env.services()).await.unwrap();
    assert_eq!(again.node_id(), env.node.node_id());
}
