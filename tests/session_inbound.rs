//! Integration tests for the inbound data path.

use std::time::Duration;

use bytes::Bytes;
use relink::{
    Message,
    Session,
    SessionError,
    SessionEvent,
    SessionState,
    decoder::DecodeError,
};
use relink_testing::{
    Peer,
    Script,
    ScriptedConnector,
    connector,
    drain_events,
    encode_frame,
    next_event,
    wait_for_event,
};
use rstest::rstest;
use serde_json::json;

async fn connected(
    name: &str,
    connector: &ScriptedConnector,
    max_buffer: usize,
) -> (Session, Peer) {
    connector.push(Script::Accept);
    let session = Session::builder(name)
        .connector(connector.clone())
        .max_buffer(max_buffer)
        .build();
    session.connect().await.expect("connect");
    let peer = connector.next_peer().await;
    (session, peer)
}

fn data(event: SessionEvent) -> Message {
    match event {
        SessionEvent::Data(message) => message,
        other => panic!("expected data, got {other:?}"),
    }
}

#[rstest]
#[tokio::test]
async fn json_split_across_messages_is_reassembled(connector: ScriptedConnector) {
    let (session, mut peer) = connected("mysql-mcp-server", &connector, 1024).await;
    let mut events = session.subscribe();

    peer.send(br#"{"id":1,"#).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    peer.send(b"\"rows\":[1,2]}\n").await;

    let message = data(next_event(&mut events).await);
    assert_eq!(message, Message::Json(json!({"id": 1, "rows": [1, 2]})));
}

#[rstest]
#[tokio::test]
async fn several_values_in_one_write_arrive_in_order(connector: ScriptedConnector) {
    let (session, mut peer) = connected("mysql-mcp-server", &connector, 1024).await;
    let mut events = session.subscribe();

    peer.send(b"{\"seq\":1}\n{\"seq\":2}{\"seq\":3}").await;

    for seq in 1..=3 {
        let message = data(next_event(&mut events).await);
        assert_eq!(message, Message::Json(json!({ "seq": seq })));
    }
}

#[rstest]
#[tokio::test]
async fn malformed_input_is_reported_and_session_stays_open(connector: ScriptedConnector) {
    let (session, mut peer) = connected("mysql-mcp-server", &connector, 1024).await;
    let mut events = session.subscribe();

    peer.send(b"malformed{json\n").await;
    // The leading garbage, then the unparseable object through the newline.
    for expected in [9, 6] {
        let SessionEvent::Error(error) = next_event(&mut events).await else {
            panic!("expected a decode error");
        };
        let SessionError::Decode(DecodeError::Malformed(diagnostic)) = &*error else {
            panic!("expected a malformed-input diagnostic, got {error:?}");
        };
        assert!(!diagnostic.message().is_empty());
        assert_eq!(diagnostic.discarded(), expected);
    }

    peer.send(br#"{"ok":true}"#).await;
    let message = data(next_event(&mut events).await);
    assert_eq!(message, Message::Json(json!({"ok": true})));
    assert!(session.is_connected());
    assert_eq!(session.status().error_count, 2);
}

#[rstest]
#[tokio::test]
async fn value_after_garbage_in_same_message_is_delivered(connector: ScriptedConnector) {
    let (session, mut peer) = connected("mysql-mcp-server", &connector, 1024).await;
    let mut events = session.subscribe();

    peer.send(br#"{"a":1}xx{"b":2}"#).await;
    assert_eq!(
        data(next_event(&mut events).await),
        Message::Json(json!({"a": 1}))
    );
    assert_eq!(next_event(&mut events).await.name(), "error");
    assert_eq!(
        data(next_event(&mut events).await),
        Message::Json(json!({"b": 2}))
    );
}

#[rstest]
#[tokio::test]
async fn buffer_overflow_closes_without_reconnecting(connector: ScriptedConnector) {
    let (session, mut peer) = connected("mysql-mcp-server", &connector, 64).await;
    let mut events = session.subscribe();

    let mut oversized = br#"{"blob":""#.to_vec();
    oversized.extend(std::iter::repeat_n(b'x', 200));
    peer.send(&oversized).await;

    let SessionEvent::Error(error) = next_event(&mut events).await else {
        panic!("expected an overflow error");
    };
    assert!(error.is_fatal_decode());
    assert!(matches!(
        &*error,
        SessionError::Decode(DecodeError::BufferOverflow { max: 64, .. })
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Disconnected
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.calls(), 1);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[rstest]
#[tokio::test]
async fn passthrough_endpoint_emits_messages_unchanged(connector: ScriptedConnector) {
    let (session, mut peer) = connected("fetch", &connector, 1024).await;
    let mut events = session.subscribe();

    peer.send(b"HTTP/1.1 200 OK").await;
    let message = data(next_event(&mut events).await);
    assert_eq!(message, Message::Text("HTTP/1.1 200 OK".into()));

    peer.send([0xffu8, 0xfe, 0x00]).await;
    let message = data(next_event(&mut events).await);
    assert_eq!(
        message,
        Message::Binary(Bytes::from_static(&[0xff, 0xfe, 0x00]))
    );
}

#[rstest]
#[tokio::test]
async fn data_follows_connected(connector: ScriptedConnector) {
    connector.push(Script::Accept);
    let session = Session::builder("mysql-mcp-server")
        .connector(connector.clone())
        .build();
    let mut events = session.subscribe();
    session.connect().await.expect("connect");
    let mut peer = connector.next_peer().await;

    peer.send(br#"{"hello":"world"}"#).await;
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Connected
    ));
    let message = wait_for_event(&mut events, "data").await;
    assert_eq!(data(message), Message::Json(json!({"hello": "world"})));
}

#[rstest]
#[tokio::test]
async fn message_split_in_transit_arrives_as_one(connector: ScriptedConnector) {
    let (session, mut peer) = connected("fetch", &connector, 1024).await;
    let mut events = session.subscribe();

    let wire = encode_frame(b"hello world");
    let (head, tail) = wire.split_at(10);
    peer.write_raw(head).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(drain_events(&mut events).is_empty(), "partial message delivered");
    peer.write_raw(tail).await;

    let message = data(next_event(&mut events).await);
    assert_eq!(message, Message::Text("hello world".into()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(drain_events(&mut events).is_empty());
}
