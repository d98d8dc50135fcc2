//! End-to-end tests of connect/publish/disconnect over the scripted engine
//!
//! Each test builds a session on `MockEngine` with a static resolver and,
//! unless the test is about early delivery, a running liveness driver.

use rumqttc::v5::mqttbytes::QoS;
use std::sync::Arc;
use std::time::Duration;
use syncmqtt::engine::{EngineError, EngineEvent};
use syncmqtt::error::{errno, status, SessionError};
use syncmqtt::identity::ClientIdentity;
use syncmqtt::session::{ClientSession, SessionSettings, SignalKind};
use syncmqtt::testing::{EngineCall, MockEngine, MockFailure, StaticResolver};
use tokio::time::Instant;

const BROKER_IP: &str = "192.168.178.100";

fn settings() -> SessionSettings {
    SessionSettings {
        poll_interval: Duration::from_millis(10),
        ..SessionSettings::default()
    }
}

fn session_with(engine: Arc<MockEngine>, settings: SessionSettings) -> ClientSession<MockEngine> {
    let identity = ClientIdentity::from_device_id(&[0xDE, 0xAD, 0xBE, 0xEF, 1, 2, 3, 4]).unwrap();
    let resolver = StaticResolver::new().with_host("broker", format!("{BROKER_IP}:0").parse().unwrap());

    ClientSession::new(identity, engine, settings)
        .unwrap()
        .with_resolver(Arc::new(resolver))
}

fn session(engine: Arc<MockEngine>) -> ClientSession<MockEngine> {
    session_with(engine, settings())
}

#[tokio::test]
async fn test_init_hands_identity_and_buffers_to_engine() {
    let engine = Arc::new(MockEngine::new());
    let _session = session(engine.clone());

    match engine.calls().first() {
        Some(EngineCall::Init(params)) => {
            assert_eq!(params.client_id, "deadbeef01020304");
            assert_eq!(params.rx_buf_size, 2048);
            assert_eq!(params.tx_buf_size, 2048);
        }
        other => panic!("expected init call, got {other:?}"),
    }
}

#[tokio::test]
async fn test_init_failure_is_reported() {
    let engine = Arc::new(MockEngine::new());
    engine.fail_init(MockFailure::Io);

    let identity = ClientIdentity::from_device_id(&[1; 8]).unwrap();
    let result = ClientSession::new(identity, engine, settings());
    assert!(matches!(result, Err(SessionError::Init(_))));
}

#[tokio::test]
async fn test_connect_succeeds_on_accepted_connack() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    let result = session.connect("broker:1883").await;
    assert_eq!(status(&result), 0);

    assert_eq!(
        session.endpoint().await,
        Some(format!("{BROKER_IP}:1883").parse().unwrap())
    );
    assert!(engine
        .calls()
        .contains(&EngineCall::Connect(format!("{BROKER_IP}:1883").parse().unwrap())));
}

#[tokio::test]
async fn test_connect_returns_connack_status() {
    let engine = Arc::new(MockEngine::new());
    engine.set_connect_response(Some(-1));
    let session = session(engine);
    let _driver = session.spawn_driver();

    let result = session.connect("broker:1883").await;
    assert!(matches!(
        result,
        Err(SessionError::Protocol {
            operation: SignalKind::Connect,
            code: -1
        })
    ));
    assert_eq!(status(&result), -1);
}

#[tokio::test]
async fn test_unresolvable_host_never_reaches_engine() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    let result = session.connect("nowhere.invalid").await;
    assert!(matches!(result, Err(SessionError::Resolve { .. })));
    assert!(status(&result) < 0);

    assert_eq!(engine.connect_calls(), 0);
    assert!(!session
        .dispatcher()
        .signals()
        .get(SignalKind::Connect)
        .is_fired());
    assert_eq!(session.endpoint().await, None);
}

#[tokio::test]
async fn test_failed_resolve_clears_previous_endpoint() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    session.connect("broker").await.unwrap();
    assert!(session.endpoint().await.is_some());

    assert!(session.connect("broker:notaport").await.is_err());
    assert_eq!(session.endpoint().await, None);
    assert_eq!(engine.connect_calls(), 1);
}

#[tokio::test]
async fn test_publish_issues_one_at_least_once_request() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    session.connect("broker").await.unwrap();
    let result = session.publish("time", b"Sat Jan  1 00:00:00 2000\n").await;
    assert_eq!(status(&result), 0);

    let published = engine.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "time");
    assert_eq!(published[0].payload.len(), 25);
    assert_eq!(published[0].qos, QoS::AtLeastOnce);
    assert!(!published[0].retain);
    assert_ne!(published[0].message_id, 0);
}

#[tokio::test]
async fn test_publish_accepts_empty_payload() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    assert!(session.publish("time", b"").await.is_ok());
    assert!(engine.published()[0].payload.is_empty());
}

#[tokio::test]
async fn test_publish_rejects_wildcard_topic_without_request() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    let result = session.publish("sensors/#", b"x").await;
    assert!(matches!(result, Err(SessionError::InvalidTopic { .. })));
    assert_eq!(status(&result), errno::EINVAL);
    assert!(engine.published().is_empty());
}

#[tokio::test]
async fn test_request_error_returned_without_waiting() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    engine.fail_next_request(MockFailure::NotConnected);
    let started = Instant::now();
    let result = session.publish("time", b"now").await;

    assert!(matches!(
        result,
        Err(SessionError::Request {
            operation: SignalKind::Publish,
            source: EngineError::NotConnected
        })
    ));
    assert_eq!(status(&result), errno::ENOTCONN);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_publish_times_out_without_puback() {
    let engine = Arc::new(MockEngine::new());
    engine.set_publish_response(None);
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    let started = Instant::now();
    let result = session.publish("time", b"now").await;
    let elapsed = started.elapsed();

    assert!(matches!(
        result,
        Err(SessionError::Timeout {
            operation: SignalKind::Publish,
            ..
        })
    ));
    assert_eq!(status(&result), errno::ETIMEDOUT);
    assert!(elapsed >= Duration::from_secs(30), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(31), "{elapsed:?}");
    assert_eq!(engine.published().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_honours_configured_bound() {
    let engine = Arc::new(MockEngine::new());
    engine.set_disconnect_response(None);
    let session = session_with(
        engine,
        SessionSettings {
            response_timeout: Duration::from_secs(5),
            ..settings()
        },
    );
    let _driver = session.spawn_driver();

    let started = Instant::now();
    let result = session.disconnect().await;

    assert!(matches!(result, Err(SessionError::Timeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(6));
}

#[tokio::test]
async fn test_outcome_delivered_before_wait_is_kept() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());

    // No driver: the CONNACK is dispatched inside the connect request itself
    engine.deliver_inline(session.dispatcher().clone());

    let result = session.connect("broker").await;
    assert!(result.is_ok(), "{result:?}");
}

#[tokio::test]
async fn test_stale_outcome_cleared_by_next_arm() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    // A late PUBACK from an earlier, abandoned publish
    session
        .dispatcher()
        .dispatch(&EngineEvent::PubAck {
            status: errno::EIO,
            message_id: 4,
        });

    let result = session.publish("time", b"now").await;
    assert!(result.is_ok(), "{result:?}");
}

#[tokio::test]
async fn test_disconnect_reports_broker_status() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    session.connect("broker").await.unwrap();
    assert!(session.disconnect().await.is_ok());

    engine.set_disconnect_response(Some(errno::ECONNRESET));
    let result = session.disconnect().await;
    assert_eq!(status(&result), errno::ECONNRESET);
}

#[tokio::test]
async fn test_disconnect_without_session() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    engine.fail_next_request(MockFailure::NotConnected);
    let result = session.disconnect().await;
    assert_eq!(status(&result), errno::ENOTCONN);
}

#[tokio::test]
async fn test_concurrent_publishes_each_get_their_ack() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine.clone());
    let _driver = session.spawn_driver();

    let (first, second) = futures::join!(
        session.publish("sensors/temperature", b"21.5"),
        session.publish("sensors/humidity", b"40")
    );

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(engine.published().len(), 2);
}

#[tokio::test]
async fn test_unrelated_events_do_not_complete_operations() {
    let engine = Arc::new(MockEngine::new());
    engine.set_publish_response(None);
    let session = session_with(
        engine.clone(),
        SessionSettings {
            response_timeout: Duration::from_millis(200),
            ..settings()
        },
    );
    let _driver = session.spawn_driver();

    engine.inject(EngineEvent::PingResp);
    engine.inject(EngineEvent::SubAck { message_id: 1 });
    engine.inject(EngineEvent::PubRec { message_id: 2 });

    let result = session.publish("time", b"now").await;
    assert!(matches!(result, Err(SessionError::Timeout { .. })));
}

#[tokio::test]
async fn test_driver_shutdown_aborts_waiting_operation() {
    let engine = Arc::new(MockEngine::new());
    engine.set_publish_response(None);
    let session = Arc::new(session(engine.clone()));
    let driver = session.spawn_driver();

    let waiter = {
        let session = session.clone();
        tokio::spawn(async move { session.publish("time", b"now").await })
    };

    // Let the publish arm and issue before stopping the driver
    while engine.published().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    driver.shutdown().await;

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(SessionError::Closed { .. })));
    assert_eq!(status(&result), errno::ESHUTDOWN);
}

#[tokio::test]
async fn test_respawned_driver_reopens_signals() {
    let engine = Arc::new(MockEngine::new());
    let session = session(engine);

    session.spawn_driver().shutdown().await;
    assert!(session.connect("broker").await.is_err());

    let _driver = session.spawn_driver();
    assert!(session.connect("broker").await.is_ok());
}
