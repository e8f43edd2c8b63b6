//! End-to-end tests over real TCP sockets.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use relink::{
    EndpointEntry,
    EndpointTable,
    Framing,
    Message,
    Session,
    SessionConfig,
    SessionEvent,
    SessionState,
    transport::frame_codec,
};
use relink_testing::{next_event, wait_for_event};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

async fn listener() -> (TcpListener, EndpointTable) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let address = listener.local_addr().expect("listener address");
    let table = EndpointTable::empty().with_entry("echo", EndpointEntry {
        address,
        framing: Framing::Json,
    });
    (listener, table)
}

#[tokio::test]
async fn json_round_trip_over_tcp() {
    let (listener, table) = listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept client");
        let mut peer = Framed::new(stream, frame_codec());
        let request = peer
            .next()
            .await
            .expect("request message")
            .expect("read request");
        let request: serde_json::Value = serde_json::from_slice(&request).expect("json request");
        let reply = json!({"id": request["id"], "result": "pong"});
        peer.send(Bytes::from(reply.to_string()))
            .await
            .expect("write reply");
        // Hold the connection open until the client disconnects.
        let _ = peer.next().await;
    });

    let session = Session::builder("echo").endpoints(table).build();
    let mut events = session.subscribe();
    session
        .send(json!({"id": 9, "method": "ping"}))
        .await
        .expect("send request");

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Connected
    ));
    let SessionEvent::Data(message) = wait_for_event(&mut events, "data").await else {
        unreachable!("wait_for_event returns the named event");
    };
    assert_eq!(message, Message::Json(json!({"id": 9, "result": "pong"})));

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Disconnected
    ));
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server finishes")
        .expect("join server");
}

#[tokio::test]
async fn closed_port_exhausts_configured_attempts() {
    let (listener, table) = listener().await;
    drop(listener);
    let config = SessionConfig::from_json(
        r#"{"max_attempts": 2, "base_delay_ms": 10, "max_delay_ms": 20, "connect_timeout_ms": 500}"#,
    )
    .expect("valid config");

    let session = Session::builder("echo")
        .endpoints(table)
        .config(&config)
        .build();
    let mut events = session.subscribe();

    let err = session.connect().await.expect_err("nothing is listening");
    assert!(err.is_exhausted());
    assert_eq!(session.status().attempt, 2);
    assert_eq!(
        wait_for_event(&mut events, "maxRetriesExceeded").await.name(),
        "maxRetriesExceeded"
    );
}
