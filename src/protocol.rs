//! AMI wire framing.

use tracing::debug;

use crate::{
    buffer::FrameBuffer,
    constants::FRAME_TERMINATOR,
    error::AmiResult,
    message::AmiMessage,
};

/// Incremental framer for the inbound byte stream.
///
/// Accumulates reads and yields one decoded [`AmiMessage`] per `\r\n\r\n`
/// boundary. The very first thing Asterisk sends on a new connection is a
/// banner line (`Asterisk Call Manager/2.6.0\r\n`) that is not terminated by
/// a blank line and is not a well-formed message; the framer consumes and
/// discards it before normal framing starts.
pub(crate) struct AmiParser {
    buffer: FrameBuffer,
    banner_pending: bool,
}

impl AmiParser {
    pub fn new() -> Self {
        Self {
            buffer: FrameBuffer::new(),
            banner_pending: true,
        }
    }

    /// Add data to the parse buffer.
    pub fn add_data(&mut self, data: &[u8]) -> AmiResult<()> {
        self.buffer.extend_from_slice(data);
        self.buffer.check_size_limits()?;
        Ok(())
    }

    /// `true` if undecoded bytes remain buffered. EOF while this holds means
    /// the stream died mid-frame.
    pub fn has_buffered_data(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Try to decode a complete message from the buffer.
    ///
    /// Returns `Ok(None)` until a full frame is available.
    pub fn parse_message(&mut self) -> AmiResult<Option<AmiMessage>> {
        if self.banner_pending {
            if !self.skip_banner() {
                return Ok(None);
            }
        }

        let terminator = FRAME_TERMINATOR.as_bytes();
        let Some(frame) = self.buffer.extract_until_pattern(terminator) else {
            return Ok(None);
        };
        self.buffer.compact();

        let message = AmiMessage::from_bytes(&frame)?;
        Ok(Some(message))
    }

    /// Inspect the first complete line. A line without a colon is the server
    /// banner: consume and discard it. Either way, banner detection is over
    /// once a full first line has been seen. Returns `false` while the first
    /// line is still incomplete.
    fn skip_banner(&mut self) -> bool {
        let pending = self.buffer.pending();
        let Some(newline) = pending.iter().position(|&b| b == b'\n') else {
            return false;
        };
        if pending[..newline].contains(&b':') {
            self.banner_pending = false;
            return true;
        }

        let line = self.buffer.extract_until_pattern(b"\n").unwrap_or_default();
        let banner = String::from_utf8_lossy(&line);
        debug!("Discarding server banner: {}", banner.trim_end());
        self.buffer.compact();
        self.banner_pending = false;
        true
    }
}

impl Default for AmiParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_FRAME_SIZE;

    fn drain(parser: &mut AmiParser) -> Vec<AmiMessage> {
        let mut out = Vec::new();
        while let Some(m) = parser.parse_message().unwrap() {
            out.push(m);
        }
        out
    }

    #[test]
    fn parses_single_message() {
        let mut parser = AmiParser::new();
        parser
            .add_data(b"Response: Pong\r\nActionID: A\r\n\r\n")
            .unwrap();

        let messages = drain(&mut parser);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].response(), Some("Pong"));
        assert!(!parser.has_buffered_data());
    }

    #[test]
    fn banner_is_discarded() {
        let mut parser = AmiParser::new();
        parser
            .add_data(b"Asterisk Call Manager/2.6.0\r\nResponse: Success\r\n\r\n")
            .unwrap();

        let messages = drain(&mut parser);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].response(), Some("Success"));
    }

    #[test]
    fn banner_split_across_reads() {
        let mut parser = AmiParser::new();
        parser.add_data(b"Asterisk Call Man").unwrap();
        assert!(parser.parse_message().unwrap().is_none());
        parser.add_data(b"ager/2.6.0\r\n").unwrap();
        assert!(parser.parse_message().unwrap().is_none());
        parser.add_data(b"Event: FullyBooted\r\n\r\n").unwrap();

        let messages = drain(&mut parser);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event(), Some("FullyBooted"));
    }

    #[test]
    fn first_message_without_banner() {
        let mut parser = AmiParser::new();
        parser
            .add_data(b"Event: FullyBooted\r\nPrivilege: system,all\r\n\r\n")
            .unwrap();

        let messages = drain(&mut parser);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event(), Some("FullyBooted"));
    }

    #[test]
    fn byte_by_byte_feeding_yields_exact_frames() {
        let wire = b"Asterisk Call Manager/2.6.0\r\n\
                     Response: Pong\r\nActionID: A\r\n\r\n\
                     Event: Hangup\r\nActionID: B\r\n\r\n\
                     Event: FullyBooted\r\n\r\n";

        let mut parser = AmiParser::new();
        let mut messages = Vec::new();
        for byte in wire.iter() {
            parser.add_data(std::slice::from_ref(byte)).unwrap();
            messages.extend(drain(&mut parser));
        }

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].action_id(), Some("A"));
        assert_eq!(messages[1].action_id(), Some("B"));
        assert_eq!(messages[2].event(), Some("FullyBooted"));
        assert!(!parser.has_buffered_data());
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let mut parser = AmiParser::new();
        parser.add_data(b"Response: Pong\r\n").unwrap();
        assert!(parser.parse_message().unwrap().is_none());
        assert!(parser.has_buffered_data());
    }

    #[test]
    fn lf_only_terminator_is_not_a_boundary() {
        let mut parser = AmiParser::new();
        parser.add_data(b"Response: Pong\n\n").unwrap();
        assert!(parser.parse_message().unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut parser = AmiParser::new();
        parser.add_data(b"Message: ").unwrap();
        let filler = vec![b'x'; MAX_FRAME_SIZE];
        assert!(parser.add_data(&filler).is_err());
    }

    #[test]
    fn malformed_frame_is_an_error() {
        let mut parser = AmiParser::new();
        parser
            .add_data(b"Event: Hangup\r\nnot a header line\r\n\r\n")
            .unwrap();
        assert!(parser.parse_message().is_err());
    }
}
