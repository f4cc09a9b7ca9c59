use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use opwatch::event_bus::{
    ChannelSink, EmitterError, EventBus, EventEmitter, EventHub, MemorySink, NullEmitter,
    OperationEvent,
};
use opwatch::session::{OperationKind, SessionStatus};

fn progress_event(progress: u8) -> OperationEvent {
    OperationEvent::progress("sess_1", OperationKind::ModelCompression, progress, 1)
}

#[tokio::test]
async fn memory_sink_captures_dispatched_events() {
    let sink = MemorySink::new();
    let bus = EventBus::with_sink(sink.clone());
    bus.listen_for_events();

    let emitter = bus.get_emitter();
    emitter.emit(progress_event(10)).unwrap();
    emitter
        .emit(OperationEvent::diagnostic("settlement", "applied"))
        .unwrap();

    // Dispatch runs on a background task; poll until it drains.
    for _ in 0..100 {
        if sink.snapshot().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let captured = sink.snapshot();
    assert_eq!(captured.len(), 2);
    assert!(matches!(&captured[0], OperationEvent::Progress(p) if p.progress == 10));
    assert!(matches!(&captured[1], OperationEvent::Diagnostic(d) if d.scope == "settlement"));

    bus.stop_listener().await;
}

#[tokio::test]
async fn channel_sink_forwards_to_async_consumers() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let bus = EventBus::with_sink(ChannelSink::new(tx));
    bus.listen_for_events();

    bus.get_emitter().emit(progress_event(55)).unwrap();

    let received = rx.recv().await.unwrap();
    assert!(matches!(received, OperationEvent::Progress(p) if p.progress == 55));

    bus.stop_listener().await;
}

#[tokio::test]
async fn subscribers_receive_published_events() {
    let bus = EventBus::with_sinks(vec![]);
    let mut stream = bus.subscribe();

    bus.get_emitter().emit(progress_event(30)).unwrap();

    let event = stream.next_timeout(Duration::from_secs(1)).await.unwrap();
    assert!(matches!(event, OperationEvent::Progress(p) if p.progress == 30));
}

#[tokio::test]
async fn lagged_subscribers_lose_oldest_events_and_loss_is_counted() {
    let hub = EventHub::new(1);
    let mut stream = hub.subscribe();

    hub.publish(progress_event(1));
    hub.publish(progress_event(2));
    hub.publish(progress_event(3));

    match stream.recv().await {
        Err(RecvError::Lagged(missed)) => assert_eq!(missed, 2),
        other => panic!("expected lag, got {other:?}"),
    }
    assert_eq!(hub.dropped(), 2);

    let event = stream.recv().await.unwrap();
    assert!(matches!(event, OperationEvent::Progress(p) if p.progress == 3));
}

#[tokio::test]
async fn publishing_without_subscribers_is_fine() {
    let hub = EventHub::new(8);
    hub.publish(progress_event(10));
    assert_eq!(hub.dropped(), 0);
}

#[tokio::test]
async fn emitting_into_a_dropped_bus_reports_closed() {
    let bus = EventBus::with_sinks(vec![]);
    let emitter = bus.get_emitter();
    drop(bus);

    let err = emitter.emit(progress_event(1)).unwrap_err();
    assert!(matches!(err, EmitterError::Closed));
}

#[test]
fn null_emitter_swallows_everything() {
    NullEmitter.emit(progress_event(99)).unwrap();
}

#[test]
fn events_serialize_with_a_normalized_schema() {
    let event = OperationEvent::transition(
        "sess_1",
        OperationKind::PaymentCheckout,
        SessionStatus::Polling,
        SessionStatus::Succeeded,
        None,
    );
    let value = event.to_json_value();
    assert_eq!(value["type"], json!("transition"));
    assert_eq!(value["session_id"], json!("sess_1"));
    assert_eq!(value["kind"], json!("payment_checkout"));
    assert_eq!(value["from"], json!("polling"));
    assert_eq!(value["to"], json!("succeeded"));
    assert!(event.is_terminal_transition());

    let progress = progress_event(42).to_json_value();
    assert_eq!(progress["type"], json!("progress"));
    assert_eq!(progress["progress"], json!(42));

    let diagnostic = OperationEvent::diagnostic("poll_retry", "attempt 1 failed");
    assert_eq!(diagnostic.to_json_value()["type"], json!("diagnostic"));
    assert!(diagnostic.session_id().is_none());
    assert!(!diagnostic.is_terminal_transition());
}

#[test]
fn display_renders_compact_lines() {
    let event = progress_event(42);
    assert_eq!(
        event.to_string(),
        "[sess_1@model_compression] progress 42%"
    );

    let transition = OperationEvent::transition(
        "sess_1",
        OperationKind::PaymentCheckout,
        SessionStatus::Polling,
        SessionStatus::Failed,
        Some("Payment not completed".into()),
    );
    assert_eq!(
        transition.to_string(),
        "[sess_1@payment_checkout] polling -> failed: Payment not completed"
    );
}
