// ABOUTME: Integration tests for the standard-queue subscriber pipeline
// ABOUTME: Covers ack on success, lease extension, failure handling, and fatal shutdown

//! Subscriber pipeline scenarios against the recording mock transport.
//!
//! All tests run under virtual time (`start_paused`), so handler sleeps and
//! heartbeat intervals elapse instantly while preserving their ordering.

mod common;

use common::*;
use postbus::config::SubscriptionConfig;
use postbus::error::PostbusError;
use postbus::registry::HandlerRegistry;
use postbus::subscriber::QueuePoller;

use std::sync::Arc;

const QUEUE_URL: &str = "https://sqs.eu-west-1.amazonaws.com/123456789012/orders";

fn registry_with(handler: RecordingHandler) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(TEST_MESSAGE_TYPE, handler);
    Arc::new(registry)
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_single_message_is_acknowledged() {
    // ARRANGE: One successful message scripted
    init_tracing();
    let handler = RecordingHandler::new();
    let transport = Arc::new(
        MockQueueTransport::new().with_batch(vec![queue_message("m1", TestPayload::ok("m1"))]),
    );
    let poller = QueuePoller::new(
        transport.clone(),
        registry_with(handler.clone()),
        SubscriptionConfig::new(QUEUE_URL),
    )
    .unwrap();
    let cancel = poller.cancellation_token();
    let manager = Arc::clone(poller.manager());

    // ACT
    let run = tokio::spawn(poller.run());
    wait_until(|| transport.deleted_receipt_handles().len() == 1).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    // ASSERT: One invocation, one delete of length one, capacity restored
    assert!(transport.receive_count() >= 1);
    assert_eq!(handler.invocation_count(), 1);
    assert_eq!(transport.deleted_receipt_handles(), vec!["rh-m1"]);
    assert_eq!(transport.deletes.lock().unwrap()[0].len(), 1);
    assert_eq!(manager.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_long_running_handler_gets_visibility_extension() {
    // ARRANGE: 5s visibility, 3s threshold, 1s heartbeat, 10s handler
    let handler = RecordingHandler::new();
    let transport = Arc::new(
        MockQueueTransport::new()
            .with_batch(vec![queue_message("m1", TestPayload::slow("m1", 10_000))]),
    );
    let config = SubscriptionConfig::builder(QUEUE_URL)
        .with_visibility_timeout_seconds(5)
        .with_visibility_extension_threshold_seconds(3)
        .with_visibility_heartbeat_interval_seconds(1)
        .build()
        .unwrap();
    let poller = QueuePoller::new(transport.clone(), registry_with(handler.clone()), config).unwrap();
    let cancel = poller.cancellation_token();

    // ACT
    let run = tokio::spawn(poller.run());
    wait_until(|| transport.deleted_receipt_handles().len() == 1).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    // ASSERT: The lease was extended repeatedly while the handler ran,
    // always with the message's receipt handle and the configured timeout,
    // and the handler was never invoked twice
    assert!(transport.visibility_change_count() >= 2);
    for (entries, visibility) in transport.visibility_changes.lock().unwrap().iter() {
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].receipt_handle, "rh-m1");
        assert_eq!(*visibility, 5);
    }
    assert_eq!(handler.invocation_count(), 1);
    assert_eq!(transport.deleted_receipt_handles(), vec!["rh-m1"]);
}

#[tokio::test(start_paused = true)]
async fn test_handler_failure_leaves_message_undeleted() {
    // ARRANGE
    let handler = RecordingHandler::new();
    let transport = Arc::new(
        MockQueueTransport::new()
            .with_batch(vec![queue_message("m1", TestPayload::failing("m1"))]),
    );
    let poller = QueuePoller::new(
        transport.clone(),
        registry_with(handler.clone()),
        SubscriptionConfig::new(QUEUE_URL),
    )
    .unwrap();
    let cancel = poller.cancellation_token();
    let manager = Arc::clone(poller.manager());

    // ACT: Let the failure happen, then see the poller keep receiving
    let run = tokio::spawn(poller.run());
    wait_until(|| handler.invocation_count() == 1).await;
    wait_until(|| transport.receive_count() >= 2).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    // ASSERT: No delete attempt, slot released, polling continued
    assert!(transport.deletes.lock().unwrap().is_empty());
    assert_eq!(manager.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_receive_error_terminates_the_poller() {
    // ARRANGE: One slow in-flight message, then an access-denied receive
    let handler = RecordingHandler::new();
    let transport = Arc::new(
        MockQueueTransport::new()
            .with_batch(vec![queue_message("m1", TestPayload::slow("m1", 2_000))])
            .with_receive_error("AccessDenied", "missing read permission"),
    );
    let poller = QueuePoller::new(
        transport.clone(),
        registry_with(handler.clone()),
        SubscriptionConfig::new(QUEUE_URL),
    )
    .unwrap();

    // ACT
    let result = poller.run().await;

    // ASSERT: The error surfaced, no receive was issued after the fatal
    // one, and the outstanding handler completed normally
    assert!(matches!(result, Err(PostbusError::FatalQueueError { .. })));
    assert_eq!(transport.receive_count(), 2);
    assert_eq!(handler.invocation_count(), 1);
    assert_eq!(transport.deleted_receipt_handles(), vec!["rh-m1"]);
}

#[tokio::test(start_paused = true)]
async fn test_receive_size_respects_the_concurrency_ceiling() {
    // ARRANGE: Ceiling of 2 with two slow messages in the first batch
    let handler = RecordingHandler::new();
    let transport = Arc::new(MockQueueTransport::new().with_batch(vec![
        queue_message("a", TestPayload::slow("a", 5_000)),
        queue_message("b", TestPayload::slow("b", 5_000)),
    ]));
    let config = SubscriptionConfig::builder(QUEUE_URL)
        .with_max_concurrent_messages(2)
        .build()
        .unwrap();
    let poller = QueuePoller::new(transport.clone(), registry_with(handler.clone()), config).unwrap();
    let cancel = poller.cancellation_token();

    // ACT
    let run = tokio::spawn(poller.run());
    wait_until(|| handler.invocation_count() == 2).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    // ASSERT: No receive ever asked for more than the free capacity, and
    // the two handlers genuinely overlapped under the ceiling
    for request in transport.receives.lock().unwrap().iter() {
        assert!(request.max_messages <= 2);
        assert_eq!(request.wait_time_seconds, 20);
    }
    let a = handler.invocation("a").unwrap();
    let b = handler.invocation("b").unwrap();
    assert!(a.started_at < b.finished_at && b.started_at < a.finished_at);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_message_is_skipped_without_delete() {
    // ARRANGE: A body that is not an envelope, followed by a good message
    let handler = RecordingHandler::new();
    let broken = postbus::queue::QueueMessage {
        message_id: "broken".to_string(),
        receipt_handle: "rh-broken".to_string(),
        body: "{\"not\": \"an envelope\"}".to_string(),
        ..Default::default()
    };
    let transport = Arc::new(
        MockQueueTransport::new()
            .with_batch(vec![broken, queue_message("m1", TestPayload::ok("m1"))]),
    );
    let poller = QueuePoller::new(
        transport.clone(),
        registry_with(handler.clone()),
        SubscriptionConfig::new(QUEUE_URL),
    )
    .unwrap();
    let cancel = poller.cancellation_token();

    // ACT
    let run = tokio::spawn(poller.run());
    wait_until(|| transport.deleted_receipt_handles().len() == 1).await;
    cancel.cancel();
    run.await.unwrap().unwrap();

    // ASSERT: Only the good message was handled and deleted; the broken
    // one stays on the queue for redelivery
    assert_eq!(handler.labels(), vec!["m1"]);
    assert_eq!(transport.deleted_receipt_handles(), vec!["rh-m1"]);
}
