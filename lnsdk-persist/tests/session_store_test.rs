use std::sync::Arc;

use lnsdk::model::{PaymentStatus, PaymentTypeFilter};
use lnsdk::persist::Persist;
use lnsdk::session::NodeSession;
use lnsdk::util::test_utils::*;
use lnsdk_persist::kvv::memory::MemoryKVVStore;
use lnsdk_persist::kvv::KVVStore;

#[tokio::test]
async fn session_over_kvv_store() {
    let env = TestEnv::new();
    env.node.set_balances(0, 0, 10_000_000);
    let persister = Arc::new(MemoryKVVStore::new());
    let mut services = env.services();
    services.persister = persister.clone();

    let node_session = NodeSession::new();
    let session = node_session.connect(env.config(), env.seed(), services).await.unwrap();
    let invoice = session.receive_payment(2_000, "coffee").await.unwrap();
    env.node.receive(&invoice.bolt11, 2_000_000).unwrap();
    session.sync().await.unwrap();

    let payments = session.list_payments(PaymentTypeFilter::All, None, None).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Complete);
    let stored = persister.get_payment(&invoice.payment_hash).unwrap().unwrap();
    assert_eq!(stored, payments[0]);
    assert!(persister.get_version(&format!("payment/{}", invoice.payment_hash)).unwrap().is_some());
    assert!(persister.get_node_state().unwrap().is_some());
    node_session.disconnect().await.unwrap();
}
