//! Collection over a scripted chain with the real collectors and SQLite.

mod common;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{B256, U256};
use common::TestChain;
use sqlx::SqlitePool;
use starkex_sync::collectors::{
    PageCollector, StateTransitionFactCollector, StateUpdateCollector, UserTransactionAddresses,
    UserTransactionCollector,
};
use starkex_sync::db::create_pool;
use starkex_sync::db::models::{hash_to_hex, StateUpdateRecord};
use starkex_sync::db::repository::{
    self, PageRepository, StateTransitionFactRepository, StateUpdateRepository, UserTransactionRepository,
};
use starkex_sync::error::SyncError;
use starkex_sync::events::{COLLATERAL_ASSET_HASH, PERPETUAL_ADDRESS, REGISTRY_ADDRESS};
use starkex_sync::freeze::FreezeCheckService;
use starkex_sync::model::BlockRange;
use starkex_sync::rpc::EthereumClient;
use starkex_sync::sync::{DataSync, DataSyncService};

async fn service(chain: &Arc<TestChain>) -> (DataSyncService, SqlitePool) {
    let pool = create_pool("sqlite::memory:").await.expect("pool");
    let client: Arc<dyn EthereumClient> = Arc::clone(chain) as _;
    let freeze = Arc::new(FreezeCheckService::new(
        Arc::clone(&client),
        pool.clone(),
        Duration::from_secs(3600),
    ));
    let user_transactions = Arc::new(UserTransactionCollector::new(
        Arc::clone(&client),
        pool.clone(),
        UserTransactionAddresses {
            perpetual: PERPETUAL_ADDRESS,
            escape_verifier: None,
            collateral_asset: COLLATERAL_ASSET_HASH,
        },
        freeze,
    ));
    let service = DataSyncService::new(
        pool.clone(),
        StateTransitionFactCollector::new(Arc::clone(&client), pool.clone(), PERPETUAL_ADDRESS),
        PageCollector::new(Arc::clone(&client), pool.clone(), REGISTRY_ADDRESS),
        StateUpdateCollector::new(Arc::clone(&client), pool.clone(), PERPETUAL_ADDRESS),
        user_transactions,
    );
    (service, pool)
}

fn scripted_chain() -> Arc<TestChain> {
    let chain = TestChain::new(200);
    chain.add_page(105, &[1, 2]);
    chain.add_state_update(110, 1);
    chain.add_forced_withdrawal(120, 7);
    chain.add_state_update(140, 2);
    chain.add_forced_withdrawal(160, 8);
    chain.add_state_update(170, 3);
    chain.add_state_update(190, 4);
    Arc::new(chain)
}

/// Collected data without database row ids of the log tables.
async fn snapshot(pool: &SqlitePool) -> (Vec<StateUpdateRecord>, Vec<String>, Vec<(String, i64)>) {
    let state_updates = StateUpdateRepository::new(pool.clone()).get_all().await.expect("state updates");
    let facts = StateTransitionFactRepository::new(pool.clone())
        .get_all()
        .await
        .expect("facts")
        .into_iter()
        .map(|fact| fact.hash)
        .collect();
    let user_transactions = UserTransactionRepository::new(pool.clone())
        .get_all()
        .await
        .expect("user transactions")
        .into_iter()
        .map(|tx| (tx.data, tx.block_number))
        .collect();
    (state_updates, facts, user_transactions)
}

#[tokio::test]
async fn test_sync_collects_every_record_kind() {
    let chain = scripted_chain();
    let (service, pool) = service(&chain).await;

    service.sync(&BlockRange::new(100, 200), true).await.expect("sync");

    let pages = PageRepository::new(pool.clone()).get_all().await.expect("pages");
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].data, format!("{:064x}{:064x}", 1, 2));

    let (state_updates, facts, user_transactions) = snapshot(&pool).await;
    assert_eq!(state_updates.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    assert_eq!(
        state_updates.iter().map(|u| u.block_number).collect::<Vec<_>>(),
        vec![110, 140, 170, 190]
    );
    assert_eq!(facts.len(), 4);
    assert_eq!(
        state_updates[1].state_transition_hash,
        hash_to_hex(B256::from(U256::from(0xfac7_0002u64)))
    );
    assert_eq!(state_updates[1].sequence_number, "2");
    assert_eq!(state_updates[1].timestamp, 1400);
    assert_eq!(user_transactions.len(), 2);
}

#[tokio::test]
async fn test_split_ranges_produce_the_same_data() {
    let chain = scripted_chain();
    let (whole, whole_pool) = service(&chain).await;
    let (split, split_pool) = service(&chain).await;

    whole.sync(&BlockRange::new(100, 200), true).await.expect("sync");
    for range in BlockRange::new(100, 200).chunks(25) {
        split.sync(&range, range.end() == 200).await.expect("sync");
    }

    assert_eq!(snapshot(&whole_pool).await, snapshot(&split_pool).await);
}

#[tokio::test]
async fn test_discard_and_resync_after_reorg() {
    let chain = scripted_chain();
    let (service, pool) = service(&chain).await;
    service.sync(&BlockRange::new(100, 200), true).await.expect("sync");

    // Blocks from 150 are replaced: one state update moves, one disappears
    service.discard_after(149).await.expect("discard");
    let (state_updates, _, user_transactions) = snapshot(&pool).await;
    assert_eq!(state_updates.len(), 2);
    assert_eq!(user_transactions.len(), 1);

    chain.remove_logs_from(150);
    chain.add_state_update(175, 3);
    service.sync(&BlockRange::new(150, 200), true).await.expect("resync");

    let (state_updates, facts, user_transactions) = snapshot(&pool).await;
    assert_eq!(state_updates.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(state_updates[2].block_number, 175);
    assert_eq!(facts.len(), 3);
    assert_eq!(user_transactions.len(), 1);
}

#[tokio::test]
async fn test_tip_check_rejects_gaps_in_state_update_ids() {
    let chain = scripted_chain();
    let (service, pool) = service(&chain).await;
    service.sync(&BlockRange::new(100, 150), false).await.expect("sync");

    let mut tx = repository::begin(&pool).await.expect("begin");
    StateUpdateRepository::new(pool.clone())
        .add(
            &mut tx,
            &[StateUpdateRecord {
                id: 7,
                block_number: 149,
                transaction_hash: hash_to_hex(B256::with_last_byte(0x77)),
                state_transition_hash: hash_to_hex(B256::with_last_byte(0x78)),
                sequence_number: "7".to_string(),
                batch_id: "7".to_string(),
                vault_root: hash_to_hex(B256::ZERO),
                order_root: hash_to_hex(B256::ZERO),
                timestamp: 1490,
            }],
        )
        .await
        .expect("add");
    repository::commit(tx).await.expect("commit");

    // Not at the tip: no check
    service.sync(&BlockRange::new(150, 160), false).await.expect("sync");

    let result = service.sync(&BlockRange::new(160, 200), true).await;
    assert!(matches!(result, Err(SyncError::InvariantError { .. })), "{result:?}");
}

#[tokio::test]
async fn test_state_update_without_fact_fails_whole_range() {
    let chain = TestChain::new(200);
    // Root update alone, its fact is missing
    let root = starkex_sync::events::LogRootUpdate {
        sequenceNumber: U256::from(1),
        batchId: U256::from(1),
        vaultRoot: U256::from(1),
        orderRoot: U256::from(1),
    };
    chain.push_log(common::log_of(PERPETUAL_ADDRESS, &root, 150, 0, B256::with_last_byte(9)));
    let chain = Arc::new(chain);
    let (service, pool) = service(&chain).await;

    let error = service
        .sync(&BlockRange::new(100, 200), true)
        .await
        .expect_err("missing fact");
    assert!(matches!(error, SyncError::DecodingError { .. }), "{error:?}");
    assert!(error.to_string().starts_with("Decoding error: state-updates: "), "{error}");
    assert!(StateUpdateRepository::new(pool).get_all().await.expect("all").is_empty());
}
