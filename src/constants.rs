//! Protocol constants and configuration values

/// Default Asterisk AMI port for TCP connections
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Socket buffer size for reading from the stream (64KB) - standard TCP receive window
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Maximum single frame size (1MB) - caps the unconsumed parse buffer.
/// No legitimate AMI message approaches this (largest are status dumps ~100KB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol message terminators
pub const FRAME_TERMINATOR: &str = "\r\n\r\n";
pub const LINE_TERMINATOR: &str = "\r\n";

/// Separator emitted between key and value on the wire (`Key: Value`).
pub const KEY_VALUE_SEPARATOR: &str = ": ";

/// Well-known `Response` field values.
pub const RESPONSE_SUCCESS: &str = "Success";
pub const RESPONSE_GOODBYE: &str = "Goodbye";

/// Connection timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default per-subscriber event queue capacity before the delivery policy kicks in
pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 1000;

/// Capacity of the best-effort raw-bytes observer channel
pub const WIRE_TAP_CAPACITY: usize = 64;
