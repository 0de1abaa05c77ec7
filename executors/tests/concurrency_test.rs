use fixtures::*;

use std::time::Duration;

use txqueue_executors::eoa::{
    CancelOutcome, LaneKey, TransactionStatus, TransactionStore, WorkerConfig,
};

#[tokio::test]
async fn cancel_during_a_broadcast_waits_for_the_submission() {
    let harness = Harness::new(test_config());
    let queue_id = harness.enqueue().await;
    harness.chain.delay_sends(Duration::from_millis(300));

    let sending = {
        let queue = harness.queue.clone();
        tokio::spawn(async move { queue.run_send_pass(CHAIN_ID).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // a confirmation pass of the same process must leave the submission's lease alone
    let confirmation = harness.queue.run_confirm_pass(CHAIN_ID).await.unwrap();
    assert_eq!(confirmation.busy_lanes, 1);

    let response = harness.queue.cancel(&queue_id).await.unwrap();
    assert_eq!(response.result, CancelOutcome::CancellationPending);

    let submission = sending.await.unwrap();
    assert_eq!(submission.sent, 1);

    let record = harness.status(&queue_id).await;
    assert_eq!(record.status, TransactionStatus::Submitted);
    assert_eq!(record.submitted_tx_nonce, Some(START_NONCE));

    let noop = harness
        .chain
        .sent_by_hash(record.cancellation_tx_hash.unwrap())
        .unwrap();
    assert_eq!(noop.nonce, START_NONCE);
    assert_eq!(noop.to, Some(DEV_WALLET));
}

#[tokio::test]
async fn concurrent_send_passes_broadcast_each_record_once() {
    let harness = Harness::new(test_config());
    let first = harness.enqueue().await;
    let second = harness.enqueue().await;
    harness.chain.delay_sends(Duration::from_millis(100));

    let (a, b) = tokio::join!(
        harness.queue.run_send_pass(CHAIN_ID),
        harness.queue.run_send_pass(CHAIN_ID)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.sent + b.sent, 2);
    assert_eq!(a.busy_lanes + b.busy_lanes, 1);

    let nonces: Vec<u64> = harness.chain.sent().iter().map(|tx| tx.nonce).collect();
    assert_eq!(nonces, vec![START_NONCE, START_NONCE + 1]);
    assert_eq!(
        harness.status(&first).await.submitted_tx_nonce,
        Some(START_NONCE)
    );
    assert_eq!(
        harness.status(&second).await.submitted_tx_nonce,
        Some(START_NONCE + 1)
    );
}

#[tokio::test]
async fn passes_longer_than_the_lease_keep_the_lane() {
    let harness = Harness::new(WorkerConfig {
        lane_lease_ttl_ms: 300,
        ..test_config()
    });
    for _ in 0..3 {
        harness.enqueue().await;
    }
    harness.chain.delay_sends(Duration::from_millis(150));

    let sending = {
        let queue = harness.queue.clone();
        tokio::spawn(async move { queue.run_send_pass(CHAIN_ID).await.unwrap() })
    };

    // past the first deadline, before the pass is done
    tokio::time::sleep(Duration::from_millis(350)).await;
    let late = harness.queue.run_send_pass(CHAIN_ID).await.unwrap();
    assert_eq!(late.busy_lanes, 1);
    assert_eq!(late.sent, 0);

    let submission = sending.await.unwrap();
    assert_eq!(submission.sent, 3);

    let nonces: Vec<u64> = harness.chain.sent().iter().map(|tx| tx.nonce).collect();
    assert_eq!(nonces, vec![START_NONCE, START_NONCE + 1, START_NONCE + 2]);
}

#[tokio::test]
async fn separate_lanes_do_not_block_each_other() {
    let harness = Harness::new(test_config());
    let queue_id = harness.enqueue().await;

    let other_lane = LaneKey::new(SCENARIO_WALLET, CHAIN_ID);
    assert!(
        harness
            .store
            .acquire_lane(other_lane, "elsewhere", Duration::from_secs(30))
            .await
            .unwrap()
    );

    harness.send_pass().await;
    assert_eq!(harness.status(&queue_id).await.status, TransactionStatus::Submitted);
}

#[tokio::test]
async fn record_cancelled_during_a_broadcast_has_its_nonce_taken_over() {
    let harness = Harness::new(test_config());
    let queue_id = harness.enqueue().await;
    harness.chain.delay_sends(Duration::from_millis(200));

    let sending = {
        let queue = harness.queue.clone();
        tokio::spawn(async move { queue.run_send_pass(CHAIN_ID).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // a writer that does not hold the lease, as after an expired lease
    let record = harness.status(&queue_id).await;
    assert_eq!(record.status, TransactionStatus::Queued);
    let mut cancelled = record.clone();
    cancelled.status = TransactionStatus::Cancelled;
    harness.store.compare_and_swap(&record, cancelled).await.unwrap();

    let submission = sending.await.unwrap();
    assert_eq!(submission.sent, 0);

    let sent = harness.chain.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].nonce, START_NONCE);
    assert_eq!(sent[1].nonce, START_NONCE);
    assert_eq!(sent[1].to, Some(DEV_WALLET));
    assert!(sent[1].max_fee_per_gas > sent[0].max_fee_per_gas);
    assert_eq!(
        harness.status(&queue_id).await.status,
        TransactionStatus::Cancelled
    );
}

#[tokio::test]
async fn queued_record_touched_during_a_broadcast_still_records_it() {
    let harness = Harness::new(test_config());
    let queue_id = harness.enqueue().await;
    harness.chain.delay_sends(Duration::from_millis(200));

    let sending = {
        let queue = harness.queue.clone();
        tokio::spawn(async move { queue.run_send_pass(CHAIN_ID).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = harness.status(&queue_id).await;
    harness
        .store
        .compare_and_swap(&record, record.clone())
        .await
        .unwrap();

    let submission = sending.await.unwrap();
    assert_eq!(submission.sent, 1);

    let sent = harness.chain.sent();
    assert_eq!(sent.len(), 1);
    let record = harness.status(&queue_id).await;
    assert_eq!(record.status, TransactionStatus::Submitted);
    assert_eq!(record.submitted_tx_nonce, Some(START_NONCE));
    assert_eq!(record.tx_hash, Some(sent[0].hash));
}
