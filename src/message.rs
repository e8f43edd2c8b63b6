//! Decoded inbound messages and outbound payloads.
//!
//! Inbound data is surfaced as [`Message`] once a [`FrameDecoder`] has
//! reassembled it from the transport stream. Outbound data is accepted as an
//! [`Outbound`] payload and always reaches the wire in a text form.
//!
//! [`FrameDecoder`]: crate::decoder::FrameDecoder

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

/// One logically complete unit of application data extracted from a stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A self-describing structured value.
    Json(Value),
    /// A UTF-8 text chunk delivered without reassembly.
    Text(String),
    /// A non-UTF-8 chunk delivered without reassembly.
    Binary(Bytes),
}

impl Message {
    /// Borrow the structured value, if this message carries one.
    ///
    /// # Examples
    ///
    /// ```
    /// use relink::message::Message;
    /// use serde_json::json;
    ///
    /// let msg = Message::Json(json!({"id": 1}));
    /// assert_eq!(msg.as_json(), Some(&json!({"id": 1})));
    /// assert_eq!(Message::Text("hi".into()).as_json(), None);
    /// ```
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) | Self::Binary(_) => None,
        }
    }
}

/// Payload accepted by [`Session::send`](crate::session::Session::send).
///
/// Text is transmitted verbatim; structured values are serialized to their
/// canonical compact JSON form.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    /// Text sent as-is.
    Text(String),
    /// Structured value serialized before transmission.
    Json(Value),
}

impl Outbound {
    /// Serialize any value into a structured payload.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if `value` cannot be represented as
    /// JSON (for example, a map with non-string keys).
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::Json)
    }

    /// Canonical text form written to the transport.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Json(value) => value.to_string(),
        }
    }
}

impl From<String> for Outbound {
    fn from(value: String) -> Self { Self::Text(value) }
}

impl From<&str> for Outbound {
    fn from(value: &str) -> Self { Self::Text(value.to_owned()) }
}

impl From<Value> for Outbound {
    fn from(value: Value) -> Self { Self::Json(value) }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(Outbound::from("ping"), "ping")]
    #[case(Outbound::from(json!({"id": 1, "ok": true})), r#"{"id":1,"ok":true}"#)]
    #[case(Outbound::from(json!([1, 2])), "[1,2]")]
    fn outbound_serializes_to_canonical_text(#[case] payload: Outbound, #[case] expected: &str) {
        assert_eq!(payload.into_text(), expected);
    }

    #[derive(Serialize)]
    struct Query<'a> {
        sql: &'a str,
        limit: u32,
    }

    #[test]
    fn outbound_json_accepts_serializable_types() {
        let payload = Outbound::json(&Query {
            sql: "select 1",
            limit: 10,
        })
        .expect("serialize query");
        assert_eq!(payload.into_text(), r#"{"limit":10,"sql":"select 1"}"#);
    }
}
