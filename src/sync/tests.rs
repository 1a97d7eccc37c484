//! End-to-end tests for SyncEngine over a simulated transport

use super::*;
use crate::transport::{DeviceTransport, Message, TransportConfig};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn make_engine() -> SyncEngine {
    let transport = Arc::new(DeviceTransport::simulated(TransportConfig::immediate()));
    SyncEngine::new(transport)
}

#[tokio::test]
async fn test_sync_to_connected_device() {
    let engine = make_engine();
    engine
        .transport()
        .connect("device-1", "10.0.0.5", 9000)
        .await
        .unwrap();

    let result = engine
        .sync_to_device("device-1", "master-vol", "/master/volume", 80.0)
        .await;
    assert!(result.is_ok());

    let state = engine.get_parameter("master-vol").unwrap();
    assert_eq!(state.value, 80.0);
    assert_eq!(state.status, SyncStatus::Synced);
    assert!(state.last_sync_time.is_some());
    assert!(state.last_error.is_none());

    let conn = engine.transport().get("device-1").unwrap();
    assert_eq!(conn.message_count, 1);
    let last = conn.last_message.unwrap();
    assert_eq!(last.address(), "/master/volume");
    assert_eq!(last.args()[0].as_number(), Some(80.0));
}

#[tokio::test]
async fn test_sync_to_unknown_device_errors() {
    let engine = make_engine();

    let result = engine.sync_to_device("device-2", "p1", "/p/1", 5.0).await;
    assert!(result.unwrap_err().is_not_connected());

    let state = engine.get_parameter("p1").unwrap();
    assert_eq!(state.value, 5.0);
    assert_eq!(state.status, SyncStatus::Error);
    assert!(state.last_sync_time.is_none());
}

#[tokio::test]
async fn test_status_is_not_sticky_after_disconnect() {
    let engine = make_engine();
    let transport = engine.transport().clone();
    transport.connect("device-1", "10.0.0.5", 9000).await.unwrap();

    engine
        .sync_to_device("device-1", "master-vol", "/master/volume", 80.0)
        .await
        .unwrap();
    assert!(transport.disconnect("device-1"));

    let result = engine
        .sync_to_device("device-1", "master-vol", "/master/volume", 80.0)
        .await;
    assert!(result.is_err());
    assert_eq!(
        engine.get_parameter("master-vol").unwrap().status,
        SyncStatus::Error
    );
}

#[tokio::test]
async fn test_subscriber_sees_syncing_then_synced() {
    let engine = make_engine();
    engine.transport().connect("d", "h", 1).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let _sub = engine.subscribe("p", move |state: &ParameterState| {
        s.lock().push((state.status, state.value));
    });

    engine.sync_to_device("d", "p", "/p", 1.5).await.unwrap();

    assert_eq!(
        *seen.lock(),
        vec![(SyncStatus::Syncing, 1.5), (SyncStatus::Synced, 1.5)]
    );
}

#[tokio::test]
async fn test_bus_listener_runs_before_synced_notification() {
    let engine = make_engine();
    let transport = engine.transport().clone();
    transport.connect("d", "h", 1).await.unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&log);
    let _bus = transport.subscribe("/p", move |_m: &Message| l.lock().push("bus"));
    let l = Arc::clone(&log);
    let _state = engine.subscribe("p", move |state: &ParameterState| {
        l.lock().push(state.status.as_str());
    });

    engine.sync_to_device("d", "p", "/p", 1.0).await.unwrap();
    assert_eq!(*log.lock(), vec!["syncing", "bus", "synced"]);
}

#[tokio::test]
async fn test_unsubscribed_listener_never_called_again() {
    let engine = make_engine();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let sub = engine.subscribe("p", move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    engine.update_parameter("p", "/p", 1.0);
    sub.unsubscribe();
    sub.unsubscribe();

    engine.update_parameter("p", "/p", 2.0);
    engine.sync_to_device("nowhere", "p", "/p", 3.0).await.ok();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_batch_success_marks_all_synced() {
    let engine = make_engine();
    let transport = engine.transport().clone();
    transport.connect("d", "h", 1).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut subs = Vec::new();
    for address in ["/fx/reverb", "/fx/delay", "/master/volume"] {
        let o = Arc::clone(&order);
        subs.push(transport.subscribe(address, move |m: &Message| {
            o.lock().push(m.address().to_string());
        }));
    }

    let batch = vec![
        ParameterUpdate::new("reverb", "/fx/reverb", 35.0),
        ParameterUpdate::new("delay", "/fx/delay", 500.0),
        ParameterUpdate::new("volume", "/master/volume", 75.0),
    ];
    engine.sync_batch("d", &batch).await.unwrap();

    for p in &batch {
        let state = engine.get_parameter(&p.id).unwrap();
        assert_eq!(state.status, SyncStatus::Synced);
        assert_eq!(state.value, p.value);
    }
    assert_eq!(
        *order.lock(),
        vec!["/fx/reverb", "/fx/delay", "/master/volume"]
    );
}

#[tokio::test]
async fn test_batch_failure_marks_all_error() {
    let engine = make_engine();

    let batch = vec![
        ParameterUpdate::new("a", "/a", 1.0),
        ParameterUpdate::new("b", "/b", 2.0),
    ];
    let err = engine.sync_batch("offline", &batch).await.unwrap_err();
    assert!(matches!(
        err,
        crate::transport::TransportError::BatchFailed { failed: 2, total: 2, .. }
    ));

    assert_eq!(engine.summary().error, 2);
    assert_eq!(engine.summary().syncing, 0);
}

#[tokio::test]
async fn test_batch_with_invalid_address_sends_nothing() {
    let engine = make_engine();
    let transport = engine.transport().clone();
    transport.connect("d", "h", 1).await.unwrap();

    let batch = vec![
        ParameterUpdate::new("a", "/a", 1.0),
        ParameterUpdate::new("b", "", 2.0),
    ];
    assert!(engine.sync_batch("d", &batch).await.is_err());

    assert_eq!(engine.get_parameter("a").unwrap().status, SyncStatus::Error);
    assert_eq!(engine.get_parameter("b").unwrap().status, SyncStatus::Error);
    assert_eq!(transport.get("d").unwrap().message_count, 0);
}

#[tokio::test]
async fn test_retry_resends_stored_value() {
    let engine = make_engine();
    let transport = engine.transport().clone();

    engine.sync_to_device("d", "p", "/p", 42.0).await.unwrap_err();
    assert_eq!(engine.get_parameter("p").unwrap().status, SyncStatus::Error);

    transport.connect("d", "h", 1).await.unwrap();
    engine.retry("d", "p").await.unwrap();

    let state = engine.get_parameter("p").unwrap();
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(
        transport.get("d").unwrap().last_message.unwrap().args()[0].as_number(),
        Some(42.0)
    );
}

#[tokio::test]
async fn test_abandoned_sync_marks_error() {
    use crate::transport::{Connection, DeviceLink, TransportError};
    use async_trait::async_trait;

    struct HangingLink;

    #[async_trait]
    impl DeviceLink for HangingLink {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn open(&self, _: &str, _: &str, _: u16) -> Result<(), TransportError> {
            Ok(())
        }

        async fn transmit(&self, _: &Connection, _: &Message) -> Result<(), TransportError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    let config = TransportConfig {
        connect_delay_ms: 0,
        connect_timeout_ms: 1000,
        send_timeout_ms: 60_000,
    };
    let transport = Arc::new(DeviceTransport::new(config, Arc::new(HangingLink)));
    transport.connect("d", "h", 1).await.unwrap();
    let engine = SyncEngine::new(transport);

    let sync = engine.sync_to_device("d", "p", "/p", 1.0);
    let outcome = tokio::time::timeout(std::time::Duration::from_millis(20), sync).await;
    assert!(outcome.is_err());

    assert_eq!(engine.get_parameter("p").unwrap().status, SyncStatus::Error);
}

#[tokio::test]
async fn test_parallel_devices_sync_independently() {
    let engine = Arc::new(make_engine());
    let transport = engine.transport().clone();
    transport.connect("a", "h", 1).await.unwrap();
    transport.connect("b", "h", 2).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..10 {
        let engine = Arc::clone(&engine);
        let device = if i % 2 == 0 { "a" } else { "b" };
        tasks.push(tokio::spawn(async move {
            engine
                .sync_to_device(device, &format!("p{}", i), &format!("/p/{}", i), f64::from(i))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(engine.summary().synced, 10);
    assert_eq!(transport.get("a").unwrap().message_count, 5);
    assert_eq!(transport.get("b").unwrap().message_count, 5);
}

fn make_slow_engine(latency_ms: u64) -> Arc<SyncEngine> {
    use crate::transport::SimulatedLink;
    use std::time::Duration;

    let link = Arc::new(SimulatedLink::with_latency(Duration::from_millis(latency_ms)));
    let transport = Arc::new(DeviceTransport::new(TransportConfig::immediate(), link));
    Arc::new(SyncEngine::new(transport))
}

#[tokio::test]
async fn test_late_result_does_not_resolve_newer_value() {
    use std::time::Duration;

    let engine = make_slow_engine(50);
    engine.transport().connect("slow", "h", 1).await.unwrap();

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_to_device("slow", "p", "/p", 1.0).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = engine.sync_to_device("offline", "p", "/p", 2.0).await;
    assert!(second.unwrap_err().is_not_connected());

    first.await.unwrap().unwrap();

    let state = engine.get_parameter("p").unwrap();
    assert_eq!(state.value, 2.0);
    assert_eq!(state.status, SyncStatus::Error);
    assert!(state.last_sync_time.is_none());
}

#[tokio::test]
async fn test_overlapping_syncs_on_one_device_resolve_latest() {
    use std::time::Duration;

    let engine = make_slow_engine(50);
    engine.transport().connect("slow", "h", 1).await.unwrap();

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_to_device("slow", "p", "/p", 1.0).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_to_device("slow", "p", "/p", 2.0).await })
    };

    first.await.unwrap().unwrap();
    // 2.0 is still queued behind 1.0 on the lane
    let state = engine.get_parameter("p").unwrap();
    assert_eq!(state.value, 2.0);
    assert_eq!(state.status, SyncStatus::Syncing);

    second.await.unwrap().unwrap();
    let state = engine.get_parameter("p").unwrap();
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(
        engine.transport().get("slow").unwrap().last_message.unwrap().args()[0].as_number(),
        Some(2.0)
    );
}

#[tokio::test]
async fn test_dropping_older_sync_leaves_newer_pending() {
    use std::time::Duration;

    let engine = make_slow_engine(50);
    engine.transport().connect("a", "h", 1).await.unwrap();
    engine.transport().connect("b", "h", 2).await.unwrap();

    let mut older = Box::pin(engine.sync_to_device("a", "p", "/p", 1.0));
    assert!(tokio::time::timeout(Duration::from_millis(5), &mut older)
        .await
        .is_err());

    let newer = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.sync_to_device("b", "p", "/p", 2.0).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    drop(older);

    let state = engine.get_parameter("p").unwrap();
    assert_eq!(state.value, 2.0);
    assert_eq!(state.status, SyncStatus::Syncing);

    newer.await.unwrap().unwrap();
    let state = engine.get_parameter("p").unwrap();
    assert_eq!(state.status, SyncStatus::Synced);
    assert!(state.last_error.is_none());
}

proptest! {
    #[test]
    fn prop_update_always_enters_syncing(
        id in "[a-z][a-z0-9-]{0,12}",
        value in -1.0e6f64..1.0e6,
        prior in prop::sample::select(vec![0u8, 1, 2]),
    ) {
        let engine = make_engine();
        engine.update_parameter(&id, "/x", 0.0);
        match prior {
            1 => { engine.mark_synced(&id); }
            2 => { engine.mark_error(&id); }
            _ => {}
        }

        engine.update_parameter(&id, "/x", value);
        let state = engine.get_parameter(&id).unwrap();
        prop_assert_eq!(state.status, SyncStatus::Syncing);
        prop_assert_eq!(state.value, value);
        prop_assert_eq!(state.attempt, 2);
    }
}
