//! Tests for session connect, retry and teardown behaviour.

use std::{
    io,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use rstest::{fixture, rstest};
use tokio::{
    io::DuplexStream,
    sync::broadcast::{self, error::TryRecvError},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use super::{Session, SessionError, SessionEvent, SessionState, inbound::AfterClose};
use crate::{
    retry::RetryPolicy,
    transport::{MockConnector, TransportParts},
};

type Peers = Arc<Mutex<Vec<DuplexStream>>>;

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(1000),
        connect_timeout: Duration::from_millis(50),
    }
}

#[fixture]
fn peers() -> Peers { Arc::default() }

/// Open an in-memory connection, keeping the remote end alive in `peers`.
fn accept(peers: &Peers) -> io::Result<TransportParts> {
    let (local, remote) = tokio::io::duplex(1024);
    peers.lock().expect("peers lock").push(remote);
    Ok(TransportParts::from_stream(local))
}

fn refused() -> io::Result<TransportParts> { Err(io::ErrorKind::ConnectionRefused.into()) }

fn refusing_connector(times: usize) -> MockConnector {
    let mut connector = MockConnector::new();
    connector
        .expect_connect()
        .times(times)
        .returning(|_| Box::pin(async { refused() }));
    connector
}

/// Connector refusing `failures` handshakes and accepting every later one.
fn flaky_connector(failures: usize, peers: &Peers, calls: &Arc<AtomicUsize>) -> MockConnector {
    let mut connector = MockConnector::new();
    let peers = Arc::clone(peers);
    let calls = Arc::clone(calls);
    connector.expect_connect().returning(move |_| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        let outcome = if call < failures {
            refused()
        } else {
            accept(&peers)
        };
        Box::pin(async move { outcome })
    });
    connector
}

fn session_with(connector: MockConnector, policy: RetryPolicy) -> Session {
    Session::builder("fetch")
        .retry_policy(policy)
        .connector(connector)
        .build()
}

fn event_names(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => names.push(event.name()),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return names,
            Err(TryRecvError::Lagged(skipped)) => panic!("receiver lagged by {skipped}"),
        }
    }
}

async fn wait_for(events: &mut broadcast::Receiver<SessionEvent>, name: &str) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if event.name() == name {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test(start_paused = true)]
async fn connect_gives_up_after_max_attempts() {
    let session = session_with(refusing_connector(3), policy(3));
    let mut events = session.subscribe();

    let start = Instant::now();
    let err = session.connect().await.expect_err("every attempt is refused");
    let elapsed = start.elapsed();

    let SessionError::ConnectionExhausted {
        endpoint,
        attempts,
        last_error,
    } = &err
    else {
        panic!("expected exhaustion, got {err:?}");
    };
    assert_eq!(endpoint, "fetch");
    assert_eq!(*attempts, 3);
    assert!(matches!(
        &**last_error,
        SessionError::Transport(e) if e.kind() == io::ErrorKind::ConnectionRefused
    ));

    // 100 ms after the first failure, 200 ms after the second, none after the last.
    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(310), "elapsed {elapsed:?}");

    assert_eq!(session.state(), SessionState::Exhausted);
    let status = session.status();
    assert_eq!(status.attempt, 3);
    assert_eq!(status.error_count, 3);
    assert!(!status.connected);
    assert_eq!(
        event_names(&mut events),
        [
            "connectionFailed",
            "connectionFailed",
            "connectionFailed",
            "maxRetriesExceeded"
        ]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn success_after_failures_resets_attempts(peers: Peers) {
    let calls = Arc::new(AtomicUsize::new(0));
    let session = session_with(flaky_connector(2, &peers, &calls), policy(5));
    let mut events = session.subscribe();

    session.connect().await.expect("third attempt succeeds");
    assert!(session.is_connected());
    assert_eq!(session.status().attempt, 0);
    assert_eq!(session.status().error_count, 2);

    session.connect().await.expect("already connected");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        event_names(&mut events),
        ["connectionFailed", "connectionFailed", "connected"]
    );
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_counts_as_failed_attempt() {
    let mut connector = MockConnector::new();
    connector
        .expect_connect()
        .times(2)
        .returning(|_| Box::pin(std::future::pending::<io::Result<TransportParts>>()));
    let session = session_with(connector, policy(2));

    let start = Instant::now();
    let err = session.connect().await.expect_err("handshakes hang");
    let elapsed = start.elapsed();

    let SessionError::ConnectionExhausted { last_error, .. } = &err else {
        panic!("expected exhaustion, got {err:?}");
    };
    assert!(matches!(
        &**last_error,
        SessionError::ConnectionTimeout { timeout } if *timeout == Duration::from_millis(50)
    ));
    // Two 50 ms deadlines separated by one 100 ms back-off.
    assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(210), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn disconnect_interrupts_backoff() {
    let session = session_with(refusing_connector(1), RetryPolicy {
        base_delay: Duration::from_secs(10),
        ..policy(5)
    });
    let mut events = session.subscribe();

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    wait_for(&mut events, "connectionFailed").await;

    session.disconnect().await;
    let err = pending
        .await
        .expect("join connect task")
        .expect_err("connect is cancelled");
    assert!(err.is_cancelled());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(
        event_names(&mut events).is_empty(),
        "nothing is emitted when disconnecting an unconnected session"
    );
}

#[tokio::test]
async fn disconnect_on_fresh_session_is_a_no_op() {
    let mut connector = MockConnector::new();
    connector.expect_connect().never();
    let session = session_with(connector, policy(1));
    let mut events = session.subscribe();

    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(event_names(&mut events).is_empty());
}

#[rstest]
#[tokio::test]
async fn disconnect_closes_connection_once(peers: Peers) {
    let calls = Arc::new(AtomicUsize::new(0));
    let session = session_with(flaky_connector(0, &peers, &calls), policy(1));
    let mut events = session.subscribe();
    session.connect().await.expect("connect");

    session.disconnect().await;
    session.disconnect().await;
    assert!(!session.is_connected());
    assert_eq!(event_names(&mut events), ["connected", "disconnected"]);

    let result = session.send("late").await;
    assert!(result.is_ok(), "send reconnects after disconnect: {result:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[rstest]
#[tokio::test]
async fn duplicate_close_schedules_one_reconnect(peers: Peers) {
    let calls = Arc::new(AtomicUsize::new(0));
    let session = session_with(flaky_connector(0, &peers, &calls), policy(1));
    let mut events = session.subscribe();
    session.connect().await.expect("connect");
    let generation = session.inner.state().generation;

    tokio::join!(
        session.close_connection(generation, AfterClose::Reconnect),
        session.close_connection(generation, AfterClose::Reconnect),
    );
    wait_for(&mut events, "connected").await;
    wait_for(&mut events, "connected").await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(session.is_connected());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(event_names(&mut events).is_empty());
}

#[rstest]
#[tokio::test]
async fn stale_close_is_ignored(peers: Peers) {
    let calls = Arc::new(AtomicUsize::new(0));
    let session = session_with(flaky_connector(0, &peers, &calls), policy(1));
    let mut events = session.subscribe();
    session.connect().await.expect("connect");
    let generation = session.inner.state().generation;

    session
        .close_connection(generation + 1, AfterClose::Reconnect)
        .await;
    assert!(session.is_connected());
    assert_eq!(event_names(&mut events), ["connected"]);
}

#[tokio::test]
async fn reconnect_is_suppressed_while_one_is_running() {
    let mut connector = MockConnector::new();
    connector.expect_connect().never();
    let session = session_with(connector, policy(1));
    session.inner.reconnecting.store(true, Ordering::SeqCst);

    session.spawn_reconnect(CancellationToken::new());
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn threshold_signal_fires_from_fifth_error() {
    let session = session_with(refusing_connector(5), policy(5));
    let mut events = session.subscribe();

    session.connect().await.expect_err("every attempt is refused");

    let names = event_names(&mut events);
    assert_eq!(
        names,
        [
            "connectionFailed",
            "connectionFailed",
            "connectionFailed",
            "connectionFailed",
            "errorThreshold",
            "connectionFailed",
            "maxRetriesExceeded",
        ]
    );

    let status = session.status();
    assert_eq!(status.error_count, 5);
    assert!(status.last_error_at.is_some());

    session.reset_errors();
    let status = session.status();
    assert_eq!(status.error_count, 0);
    assert_eq!(status.last_error_at, None);
}

#[tokio::test(start_paused = true)]
async fn threshold_snapshot_describes_session() {
    let session = session_with(refusing_connector(5), policy(5));
    let mut events = session.subscribe();
    session.connect().await.expect_err("every attempt is refused");

    let snapshot = std::iter::from_fn(|| events.try_recv().ok())
        .find_map(|event| match event {
            SessionEvent::ErrorThreshold(snapshot) => Some(snapshot),
            _ => None,
        })
        .expect("threshold event");
    assert_eq!(snapshot.endpoint_name, "fetch");
    assert_eq!(snapshot.error_count, 5);
    assert_eq!(snapshot.attempt, 5);
    assert!(!snapshot.connected);
}

#[tokio::test]
async fn send_json_rejects_unserializable_payloads() {
    use std::collections::HashMap;

    let mut connector = MockConnector::new();
    connector.expect_connect().never();
    let session = session_with(connector, policy(1));

    let mut payload = HashMap::new();
    payload.insert((1, 2), "tuple keys are not valid JSON object keys");
    let err = session
        .send_json(&payload)
        .await
        .expect_err("serialization fails");
    assert!(matches!(err, SessionError::Serialize(_)));
}

#[tokio::test]
async fn dropping_last_handle_stops_reader() {
    let peers = Peers::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let session = session_with(flaky_connector(0, &peers, &calls), policy(1));
    session.connect().await.expect("connect");
    let weak = Arc::downgrade(&session.inner);

    drop(session);
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(weak.upgrade().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
