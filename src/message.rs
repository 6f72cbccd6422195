//! AMI message representation and text codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::str::FromStr;

use crate::{
    constants::{KEY_VALUE_SEPARATOR, LINE_TERMINATOR, RESPONSE_SUCCESS},
    error::{AmiError, AmiResult},
    fields::AmiField,
};

/// One AMI packet: an ordered sequence of `(key, value)` fields.
///
/// Order is preserved on both read and write - AMI is order-sensitive on the
/// wire for some fields, and ordered output keeps logs readable. Duplicate
/// keys are permitted (`Variable` headers repeat, some events repeat keys).
/// Key lookups fold ASCII case; values are stored and compared verbatim.
///
/// Constructing a message assigns a fresh UUID `ActionID` immediately, so
/// callers can read the id back before sending:
///
/// ```
/// use asterisk_ami_tokio::{AmiField, AmiMessage};
///
/// let ping = AmiMessage::new("Ping");
/// assert_eq!(ping.action(), Some("Ping"));
/// assert!(!ping.action_id().unwrap().is_empty());
///
/// let mut custom = AmiMessage::new("Originate");
/// custom.set(AmiField::ActionId, "my-id-1");
/// assert_eq!(custom.action_id(), Some("my-id-1"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmiMessage {
    fields: Vec<(String, String)>,
    created_at: DateTime<Utc>,
}

impl AmiMessage {
    /// Build an outbound action message.
    ///
    /// Sets the `Action` field and auto-assigns a UUID v4 `ActionID`
    /// (8-4-4-4-12 hex form). Overwrite it with [`set()`](Self::set) to use a
    /// caller-chosen correlation id.
    pub fn new(action: impl Into<String>) -> Self {
        let mut message = Self::empty();
        message.push(AmiField::Action, action);
        message.push(AmiField::ActionId, uuid::Uuid::new_v4().to_string());
        message
    }

    /// A message with no fields. Parse and client internals only; outbound
    /// construction goes through [`new()`](Self::new).
    pub(crate) fn empty() -> Self {
        Self {
            fields: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Value of the first field whose key matches, folding ASCII case.
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the value of the first matching field, or append a new one.
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = key.as_ref();
        match self
            .fields
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some((_, v)) => *v = value.into(),
            None => self.fields.push((key.to_string(), value.into())),
        }
    }

    /// Append a field, keeping any existing fields with the same key.
    pub fn push(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.fields
            .push((key.as_ref().to_string(), value.into()));
    }

    /// All fields in insertion order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// When this message was constructed or parsed.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `Action` field, present on outbound messages.
    pub fn action(&self) -> Option<&str> {
        self.get(AmiField::Action)
    }

    /// `ActionID` correlation field.
    pub fn action_id(&self) -> Option<&str> {
        self.get(AmiField::ActionId)
    }

    /// `Event` field, present on server-originated events.
    pub fn event(&self) -> Option<&str> {
        self.get(AmiField::Event)
    }

    /// `Response` field, present on replies.
    pub fn response(&self) -> Option<&str> {
        self.get(AmiField::Response)
    }

    /// `true` if the `Response` field equals `Success` (verbatim).
    pub fn is_success(&self) -> bool {
        self.response() == Some(RESPONSE_SUCCESS)
    }

    /// Serialize to wire bytes: `Key: Value\r\n` per field in insertion
    /// order, terminated by the empty line (the packet ends `\r\n\r\n`).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for (key, value) in &self.fields {
            let _ = write!(out, "{}{}{}{}", key, KEY_VALUE_SEPARATOR, value, LINE_TERMINATOR);
        }
        out.push_str(LINE_TERMINATOR);
        out.into_bytes()
    }

    /// Parse one complete frame.
    ///
    /// Tolerates LF-only line endings and skips blank lines, so both a bare
    /// frame (terminator already stripped by the framer) and a full packet
    /// round-trip. Fails on invalid UTF-8 or a non-empty line without a colon.
    pub fn from_bytes(bytes: &[u8]) -> AmiResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| AmiError::malformed("invalid UTF-8 in frame"))?;
        text.parse()
    }
}

impl FromStr for AmiMessage {
    type Err = AmiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut message = AmiMessage::empty();
        for line in s.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| AmiError::malformed(format!("line without colon: {:?}", line)))?;
            message
                .fields
                .push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(message)
    }
}

/// Field-sequence equality; the creation timestamp is excluded so a decoded
/// copy compares equal to the original.
impl PartialEq for AmiMessage {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for AmiMessage {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn new_assigns_action_and_action_id() {
        let m = AmiMessage::new("Ping");
        assert_eq!(m.action(), Some("Ping"));
        let id = m.action_id().expect("ActionID auto-assigned");
        // 8-4-4-4-12 hex form
        let lens: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(lens, [8, 4, 4, 4, 12]);
    }

    #[test]
    fn action_ids_are_unique() {
        let ids: HashSet<String> = (0..10_000)
            .map(|_| AmiMessage::new("Ping").action_id().unwrap().to_string())
            .collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn get_folds_case() {
        let m: AmiMessage = "Response: Success\r\nActionID: abc".parse().unwrap();
        assert_eq!(m.get("response"), Some("Success"));
        assert_eq!(m.get("ACTIONID"), Some("abc"));
        assert_eq!(m.get("actionid"), Some("abc"));
    }

    #[test]
    fn get_returns_first_of_duplicates() {
        let m: AmiMessage = "Variable: a=1\r\nVariable: b=2".parse().unwrap();
        assert_eq!(m.get("Variable"), Some("a=1"));
        assert_eq!(m.fields().len(), 2);
    }

    #[test]
    fn set_replaces_first_match_or_appends() {
        let mut m: AmiMessage = "Variable: a=1\r\nVariable: b=2".parse().unwrap();
        m.set("variable", "c=3");
        assert_eq!(m.fields()[0], ("Variable".to_string(), "c=3".to_string()));
        assert_eq!(m.fields()[1], ("Variable".to_string(), "b=2".to_string()));

        m.set("Channel", "SIP/100");
        assert_eq!(m.fields().len(), 3);
        assert_eq!(m.get("Channel"), Some("SIP/100"));
    }

    #[test]
    fn encode_preserves_order_and_terminates() {
        let mut m = AmiMessage::empty();
        m.push("Action", "Ping");
        m.push("ActionID", "A");
        assert_eq!(m.to_bytes(), b"Action: Ping\r\nActionID: A\r\n\r\n");
    }

    #[test]
    fn decode_encode_round_trip() {
        let mut m = AmiMessage::empty();
        m.push("Event", "Newchannel");
        m.push("Variable", "x=1");
        m.push("Variable", "y=2");
        m.push("CallerIDName", "Alice: the first");

        let decoded = AmiMessage::from_bytes(&m.to_bytes()).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn value_may_contain_colons() {
        let m: AmiMessage = "Message: a:b:c".parse().unwrap();
        assert_eq!(m.get("Message"), Some("a:b:c"));
    }

    #[test]
    fn value_whitespace_is_stripped() {
        let m: AmiMessage = "Response:   Success  \r\n".parse().unwrap();
        assert_eq!(m.response(), Some("Success"));
    }

    #[test]
    fn decode_tolerates_lf_only() {
        let m = AmiMessage::from_bytes(b"Response: Pong\nActionID: A\n").unwrap();
        assert_eq!(m.response(), Some("Pong"));
        assert_eq!(m.action_id(), Some("A"));
    }

    #[test]
    fn decode_rejects_line_without_colon() {
        let err = AmiMessage::from_bytes(b"Response Success\r\n").unwrap_err();
        assert!(matches!(err, AmiError::MalformedMessage { .. }));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let err = AmiMessage::from_bytes(&[0x52, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, AmiError::MalformedMessage { .. }));
    }

    #[test]
    fn is_success_compares_verbatim() {
        let ok: AmiMessage = "Response: Success".parse().unwrap();
        assert!(ok.is_success());
        let err: AmiMessage = "Response: Error".parse().unwrap();
        assert!(!err.is_success());
        let folded: AmiMessage = "Response: success".parse().unwrap();
        assert!(!folded.is_success());
    }
}
