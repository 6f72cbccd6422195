//! Typed field names for well-known AMI message keys.

/// Error returned when parsing an unrecognized field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAmiFieldError(pub String);

impl std::fmt::Display for ParseAmiFieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown AMI field: {}", self.0)
    }
}

impl std::error::Error for ParseAmiFieldError {}

define_field_enum! {
    error_type: ParseAmiFieldError,
    /// Field names that appear in AMI actions, responses, and events.
    ///
    /// The client core is schema-agnostic; this is a name catalog for the
    /// handful of keys the protocol machinery and common call-control code
    /// touch. Use with [`AmiMessage::get()`](crate::AmiMessage::get) for
    /// typo-proof lookups. Lookups fold case; the wire spelling here is the
    /// conventional one Asterisk emits.
    pub enum AmiField {
        Action => "Action",
        ActionId => "ActionID",
        Response => "Response",
        Event => "Event",
        Message => "Message",
        Username => "Username",
        Secret => "Secret",
        AuthType => "AuthType",
        Challenge => "Challenge",
        Key => "Key",
        EventList => "EventList",
        Uniqueid => "Uniqueid",
        Channel => "Channel",
        CallerIdNum => "CallerIDNum",
        CallerIdName => "CallerIDName",
        Context => "Context",
        Exten => "Exten",
        Variable => "Variable",
        Cause => "Cause",
        CauseTxt => "Cause-txt",
    }
}
