mod common;

use common::{FakeGateway, fast_pipeline_config, numbered_lines};
use rask_log_shipper::consumer::LogTail;
use rask_log_shipper::network::Transport;
use rask_log_shipper::pipeline::{Pipeline, PipelineConfig, ShutdownPolicy, ShutdownReport, TickReport};
use rask_log_shipper::sender::{Compressor, MessagingGateway};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn decode(payload: &[u8]) -> Vec<String> {
    Compressor::new().decompress_lines(payload).unwrap()
}

#[tokio::test]
async fn test_cold_start_publishes_one_batch_per_tick() {
    let gateway = FakeGateway::new();
    let pipeline = Pipeline::new(fast_pipeline_config("dev-1", 20), gateway.clone()).unwrap();

    for line in numbered_lines(0..25) {
        pipeline.submit(line);
    }

    let first = pipeline.engine().tick().await;
    assert_eq!(first.lines_published, 20);
    let second = pipeline.engine().tick().await;
    assert_eq!(second.lines_published, 5);

    let published = gateway.published();
    assert_eq!(published.len(), 2);
    assert!(published.iter().all(|(key, _)| key == "log.dev-1"));
    assert_eq!(decode(&published[0].1), numbered_lines(0..20));
    assert_eq!(decode(&published[1].1), numbered_lines(20..25));
    assert_eq!(gateway.connect_count(), 1);

    let metrics = pipeline.metrics();
    assert_eq!(metrics.batches_published, 2);
    assert_eq!(metrics.lines_published, 25);
    assert_eq!(metrics.buffer_depth, 0);
}

#[tokio::test]
async fn test_empty_tick_touches_nothing() {
    let gateway = FakeGateway::new();
    let pipeline = Pipeline::new(fast_pipeline_config("dev-1", 20), gateway.clone()).unwrap();

    let report = pipeline.engine().tick().await;
    assert_eq!(report, TickReport::default());
    assert_eq!(gateway.connect_count(), 0);
    assert_eq!(gateway.publish_count(), 0);
}

#[tokio::test]
async fn test_outage_then_recovery_preserves_order() {
    let gateway = FakeGateway::new();
    let pipeline = Pipeline::new(fast_pipeline_config("dev-1", 10), gateway.clone()).unwrap();
    let monitor = pipeline.network_monitor();

    gateway.set_refuse_connections(true);
    for line in numbered_lines(0..10) {
        pipeline.submit(line);
    }
    let failed = pipeline.engine().tick().await;
    assert_eq!(failed.batches_failed, 1);
    assert_eq!(pipeline.engine().retry_queue().len(), 1);
    assert!(gateway.published().is_empty());

    // Network goes away: ticks are skipped without touching the gateway
    monitor.on_available(1, Transport::Wifi);
    monitor.on_lost(1);
    let connects_before = gateway.connect_count();
    for line in numbered_lines(10..15) {
        pipeline.submit(line);
    }
    assert!(pipeline.engine().tick().await.skipped);
    assert_eq!(gateway.connect_count(), connects_before);

    // Broker and network come back; the queued batch goes out first
    gateway.set_refuse_connections(false);
    monitor.on_available(1, Transport::Wifi);
    let drained = pipeline.engine().drain_retry_queue().await;
    assert_eq!(drained.lines_published, 10);
    let tick = pipeline.engine().tick().await;
    assert_eq!(tick.lines_published, 5);

    let published = gateway.published();
    assert_eq!(decode(&published[0].1), numbered_lines(0..10));
    assert_eq!(decode(&published[1].1), numbered_lines(10..15));
    assert!(pipeline.engine().retry_queue().is_empty());
    assert_eq!(pipeline.metrics().batches_retry_queued, 1);
}

#[tokio::test]
async fn test_broken_publish_is_retried_then_queued() {
    let gateway = FakeGateway::new();
    let pipeline = Pipeline::new(fast_pipeline_config("dev-1", 5), gateway.clone()).unwrap();
    gateway.set_fail_publishes(true);

    pipeline.submit("only line");
    let report = pipeline.engine().tick().await;

    assert_eq!(report.batches_failed, 1);
    assert_eq!(gateway.publish_count(), 3);
    assert_eq!(pipeline.metrics().publish_failures, 3);

    gateway.set_fail_publishes(false);
    let report = pipeline.engine().tick().await;
    assert_eq!(report.lines_published, 1);
    assert_eq!(pipeline.metrics().consecutive_failures, 0);
}

#[tokio::test]
async fn test_full_buffer_is_flushed_without_waiting_for_the_tick() {
    let gateway = FakeGateway::new();
    let pipeline = Pipeline::new(fast_pipeline_config("dev-1", 4), gateway.clone()).unwrap();
    pipeline.start().unwrap();

    for line in numbered_lines(0..8) {
        pipeline.submit(line);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while gateway.published().len() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(gateway.published().len(), 2);

    let report = pipeline.stop().await.unwrap();
    assert_eq!(report.abandoned_lines, 0);
    assert!(!gateway.is_connected());
}

#[tokio::test]
async fn test_interval_tick_ships_partial_batches() {
    let gateway = FakeGateway::new();
    let mut config = fast_pipeline_config("dev-1", 20);
    config.batch_interval = Duration::from_millis(20);
    let pipeline = Pipeline::new(config, gateway.clone()).unwrap();
    pipeline.start().unwrap();

    pipeline.logger().i("Boot", "hello");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while gateway.published().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let published = gateway.published();
    assert_eq!(published.len(), 1);
    let lines = decode(&published[0].1);
    assert!(lines[0].ends_with(" [I] Boot: hello"), "{lines:?}");

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn test_abandon_on_stop_during_outage() {
    let gateway = FakeGateway::new();
    gateway.set_refuse_connections(true);
    let mut config = fast_pipeline_config("dev-1", 3);
    config.shutdown_policy = ShutdownPolicy::Drain {
        timeout: Duration::from_millis(500),
    };
    let pipeline = Pipeline::new(config, gateway.clone()).unwrap();
    pipeline.start().unwrap();

    pipeline.network_monitor().on_probe_result(false);
    for line in numbered_lines(0..7) {
        pipeline.submit(line);
    }

    let report = pipeline.stop().await.unwrap();
    assert_eq!(report.delivered_lines, 0);
    assert_eq!(report.abandoned_lines, 7);
    assert!(gateway.published().is_empty());
}

#[tokio::test]
async fn test_full_flush_never_overtakes_the_retry_queue() {
    let gateway = FakeGateway::new();
    let pipeline = Pipeline::new(fast_pipeline_config("dev-1", 3), gateway.clone()).unwrap();

    gateway.set_refuse_connections(true);
    for line in numbered_lines(0..2) {
        pipeline.submit(line);
    }
    assert_eq!(pipeline.engine().tick().await.batches_failed, 1);
    assert_eq!(pipeline.engine().retry_queue().len(), 1);

    gateway.set_refuse_connections(false);
    for line in numbered_lines(2..5) {
        pipeline.submit(line);
    }
    let report = pipeline.engine().flush_full_batches().await;
    assert_eq!(report.batches_published, 2);

    let published = gateway.published();
    assert_eq!(decode(&published[0].1), numbered_lines(0..2));
    assert_eq!(decode(&published[1].1), numbered_lines(2..5));
    assert!(pipeline.engine().retry_queue().is_empty());
}

#[tokio::test]
async fn test_network_recovery_wakes_the_running_pipeline() {
    let gateway = FakeGateway::new();
    let pipeline = Pipeline::new(fast_pipeline_config("dev-1", 20), gateway.clone()).unwrap();
    let monitor = pipeline.network_monitor();
    pipeline.start().unwrap();

    gateway.set_refuse_connections(true);
    for line in numbered_lines(0..4) {
        pipeline.submit(line);
    }
    assert_eq!(pipeline.engine().tick().await.batches_failed, 1);
    assert_eq!(pipeline.engine().retry_queue().len(), 1);

    gateway.set_refuse_connections(false);
    monitor.on_lost(1);
    monitor.on_available(1, Transport::Ethernet);

    // The interval is an hour, so only the drain trigger can ship this
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while gateway.published().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let published = gateway.published();
    assert_eq!(published.len(), 1);
    assert_eq!(decode(&published[0].1), numbered_lines(0..4));
    assert!(pipeline.engine().retry_queue().is_empty());

    pipeline.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drain_respects_its_timeout() {
    let gateway = FakeGateway::new();
    gateway.set_refuse_connections(true);
    let mut config = PipelineConfig::new("dev-1");
    config.shutdown_policy = ShutdownPolicy::Drain {
        timeout: Duration::from_secs(1),
    };
    let pipeline = Pipeline::new(config, gateway.clone()).unwrap();
    pipeline.start().unwrap();
    pipeline.submit("line 0");

    let started = tokio::time::Instant::now();
    let report = pipeline.stop().await.unwrap();

    assert!(started.elapsed() <= Duration::from_secs(1), "{:?}", started.elapsed());
    assert_eq!(
        report,
        ShutdownReport {
            delivered_lines: 0,
            abandoned_lines: 1,
            abandoned_batches: 1,
        }
    );
    assert!(gateway.connect_count() <= 2);
}

#[tokio::test]
async fn test_tail_receives_what_the_pipeline_ships() {
    let gateway = FakeGateway::new();
    let tail = LogTail::for_device(gateway.clone(), "dev-1")
        .unwrap()
        .with_queue("operator");

    let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink_lines = received.clone();
    let shutdown = CancellationToken::new();
    let stop_tail = shutdown.clone();
    let tail_task = tokio::spawn(async move {
        tail.run(
            move |_: &str, lines: &[String]| {
                sink_lines.lock().extend_from_slice(lines);
                Ok(())
            },
            stop_tail,
        )
        .await
    });

    // Wait for the consumer to be bound before publishing
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pipeline = Pipeline::new(fast_pipeline_config("dev-1", 20), gateway.clone()).unwrap();
    let other = Pipeline::new(fast_pipeline_config("dev-2", 20), gateway.clone()).unwrap();
    for line in numbered_lines(0..3) {
        pipeline.submit(line);
        other.submit("not for us");
    }
    pipeline.engine().tick().await;
    other.engine().tick().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while received.lock().len() < 3 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    let stats = tail_task.await.unwrap().unwrap();

    assert_eq!(*received.lock(), numbered_lines(0..3));
    assert_eq!(stats.messages, 1);
}
