use fixtures::*;

use txqueue_core::error::EngineError;
use txqueue_executors::eoa::TransactionStatus;

#[tokio::test]
async fn transfer_is_submitted_and_mined_at_nonce_562() {
    let harness = Harness::new(test_config());

    let queue_id = harness.enqueue().await;
    let queued = harness.status(&queue_id).await;
    assert_eq!(queued.status, TransactionStatus::Queued);
    assert_eq!(queued.chain_id, CHAIN_ID);
    assert_eq!(queued.contract_address, Some(SCENARIO_CONTRACT));
    assert_eq!(queued.function_name.as_deref(), Some("transfer(address,uint256)"));
    assert_eq!(queued.tx_hash, None);

    harness.send_pass().await;

    let submitted = harness.status(&queue_id).await;
    assert_eq!(submitted.status, TransactionStatus::Submitted);
    assert_eq!(submitted.submitted_tx_nonce, Some(START_NONCE));
    assert!(submitted.tx_submitted_timestamp.is_some());
    let tx_hash = submitted.tx_hash.expect("submitted transaction has a hash");

    let sent = harness.chain.sent_by_hash(tx_hash).unwrap();
    assert_eq!(sent.nonce, START_NONCE);
    assert_eq!(sent.to, Some(SCENARIO_CONTRACT));
    assert_eq!(sent.input, submitted.encoded_input_data);
    // 10% buffer over the mock estimate
    assert_eq!(sent.gas_limit, 55_000);

    harness.chain.mine(tx_hash, true);
    harness.confirm_pass().await;

    let mined = harness.status(&queue_id).await;
    assert_eq!(mined.status, TransactionStatus::Mined);
    assert_eq!(mined.tx_hash, Some(tx_hash));
    assert_eq!(mined.submitted_tx_nonce, Some(START_NONCE));
    assert!(mined.block_number.is_some());
    assert!(mined.tx_mined_timestamp.is_some());
}

#[tokio::test]
async fn unknown_queue_id_is_tx_not_found() {
    let harness = Harness::new(test_config());

    let error = harness.queue.get_status("nonexistent-id").await.unwrap_err();
    assert!(matches!(&error, EngineError::NotFoundError { queue_id } if queue_id == "nonexistent-id"));
    assert_eq!(error.error_code(), "TX_NOT_FOUND");

    let error = harness.queue.cancel("nonexistent-id").await.unwrap_err();
    assert_eq!(error.error_code(), "TX_NOT_FOUND");
}

#[tokio::test]
async fn back_to_back_enqueues_get_increasing_nonces() {
    let harness = Harness::new(test_config());

    let first = harness.enqueue().await;
    let second = harness.enqueue().await;
    let third = harness.enqueue().await;
    assert_ne!(first, second);

    harness.send_pass().await;

    let nonces = [
        harness.status(&first).await.submitted_tx_nonce,
        harness.status(&second).await.submitted_tx_nonce,
        harness.status(&third).await.submitted_tx_nonce,
    ];
    assert_eq!(
        nonces,
        [Some(START_NONCE), Some(START_NONCE + 1), Some(START_NONCE + 2)]
    );

    // later enqueues continue the sequence
    let fourth = harness.enqueue().await;
    harness.send_pass().await;
    assert_eq!(
        harness.status(&fourth).await.submitted_tx_nonce,
        Some(START_NONCE + 3)
    );
}

#[tokio::test]
async fn status_is_visible_right_after_enqueue_and_reads_are_stable() {
    let harness = Harness::new(test_config());
    let queue_id = harness.enqueue().await;

    let first = harness.status(&queue_id).await;
    let second = harness.status(&queue_id).await;
    assert_eq!(first, second);
    assert_eq!(first.queue_id, queue_id);
}

#[tokio::test]
async fn enqueue_rejects_unknown_chain() {
    let harness = Harness::new(test_config());
    let mut intent = transfer_intent(DEV_WALLET);
    intent.chain_id = 1;

    let error = harness.queue.enqueue(intent).await.unwrap_err();
    assert!(matches!(error, EngineError::UnknownChainError { chain_id: 1 }));
}

#[tokio::test]
async fn enqueue_rejects_wallet_without_signer() {
    let harness = Harness::new(test_config());

    let error = harness
        .queue
        .enqueue(transfer_intent(SCENARIO_WALLET))
        .await
        .unwrap_err();
    assert_eq!(error.error_code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn enqueue_rejects_unencodable_function() {
    let harness = Harness::new(test_config());
    let mut intent = transfer_intent(DEV_WALLET);
    intent.function_args = vec!["not-an-address".to_string(), "1".to_string()];

    let error = harness.queue.enqueue(intent).await.unwrap_err();
    assert!(matches!(error, EngineError::ValidationError { .. }));
}

#[tokio::test]
async fn caller_gas_settings_are_used_for_the_first_attempt() {
    let harness = Harness::new(test_config());
    let mut intent = transfer_intent(DEV_WALLET);
    intent.gas.gas_limit = Some(90_000);
    intent.gas.max_fee_per_gas = Some(100_000_000_000);
    intent.gas.max_priority_fee_per_gas = Some(2_000_000_000);

    let queue_id = harness.queue.enqueue(intent).await.unwrap().queue_id;
    harness.send_pass().await;

    let record = harness.status(&queue_id).await;
    let sent = harness.chain.sent_by_hash(record.tx_hash.unwrap()).unwrap();
    assert_eq!(sent.gas_limit, 90_000);
    assert_eq!(sent.max_fee_per_gas, 100_000_000_000);
    assert_eq!(sent.max_priority_fee_per_gas, Some(2_000_000_000));
}

#[tokio::test]
async fn workers_run_until_shut_down() {
    let harness = Harness::new(test_config());
    let queue_id = harness.enqueue().await;

    let workers = harness.queue.start_workers();
    assert_eq!(workers.worker_count(), 2);

    let mut submitted = None;
    for _ in 0..100 {
        let record = harness.status(&queue_id).await;
        if record.status == TransactionStatus::Submitted {
            submitted = record.tx_hash;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let tx_hash = submitted.expect("background worker submitted the transaction");

    harness.chain.mine(tx_hash, true);
    for _ in 0..100 {
        if harness.status(&queue_id).await.status == TransactionStatus::Mined {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(harness.status(&queue_id).await.status, TransactionStatus::Mined);

    workers.shutdown().await.unwrap();
}
