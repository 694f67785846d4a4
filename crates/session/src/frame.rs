//! Channel framing for Kubernetes-style exec streams
//!
//! Every transport message carries one frame: a channel selector followed by
//! the payload. `channel.k8s.io` uses a raw channel byte and raw payload in
//! binary messages; `base64.channel.k8s.io` uses an ASCII digit followed by
//! standard base64 in text messages.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::transport::WireMessage;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("unknown channel {0}")]
    UnknownChannel(u8),

    #[error("channel selector {0:#04x} is not a digit")]
    Selector(u8),

    #[error("invalid base64 payload: {0}")]
    Base64(String),

    #[error("{0} messages are not frames")]
    NotAFrame(&'static str),
}

/// Stream channel. Numbering is fixed by the remote command protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
    Error = 3,
    Resize = 4,
}

impl Channel {
    #[must_use]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Output the local terminal should show
    #[must_use]
    pub fn is_output(self) -> bool {
        matches!(self, Self::Stdout | Self::Stderr)
    }
}

impl TryFrom<u8> for Channel {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            0 => Ok(Self::Stdin),
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            3 => Ok(Self::Error),
            4 => Ok(Self::Resize),
            other => Err(FrameError::UnknownChannel(other)),
        }
    }
}

/// Negotiated WebSocket sub-protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subprotocol {
    /// `channel.k8s.io`
    Binary,
    /// `base64.channel.k8s.io`
    #[default]
    Base64,
}

impl Subprotocol {
    pub const BINARY_NAME: &'static str = "channel.k8s.io";
    pub const BASE64_NAME: &'static str = "base64.channel.k8s.io";

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Binary => Self::BINARY_NAME,
            Self::Base64 => Self::BASE64_NAME,
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            Self::BINARY_NAME => Some(Self::Binary),
            Self::BASE64_NAME => Some(Self::Base64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: Channel,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(channel: Channel, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }
}

/// Encode a frame as the transport message the sub-protocol expects
#[must_use]
pub fn encode(protocol: Subprotocol, frame: &Frame) -> WireMessage {
    match protocol {
        Subprotocol::Binary => {
            let mut data = Vec::with_capacity(frame.payload.len() + 1);
            data.push(frame.channel.index());
            data.extend_from_slice(&frame.payload);
            WireMessage::Binary(data)
        }
        Subprotocol::Base64 => {
            let mut text = String::with_capacity(frame.payload.len() * 4 / 3 + 5);
            text.push(char::from(b'0' + frame.channel.index()));
            STANDARD.encode_string(&frame.payload, &mut text);
            WireMessage::Text(text)
        }
    }
}

/// Decode one message body.
///
/// The body is taken as bytes regardless of the message type; peers are not
/// consistent about sending base64 frames as text.
pub fn decode(protocol: Subprotocol, data: &[u8]) -> Result<Frame, FrameError> {
    let (&selector, rest) = data.split_first().ok_or(FrameError::Empty)?;
    match protocol {
        Subprotocol::Binary => Ok(Frame::new(Channel::try_from(selector)?, rest)),
        Subprotocol::Base64 => {
            if !selector.is_ascii_digit() {
                return Err(FrameError::Selector(selector));
            }
            let channel = Channel::try_from(selector - b'0')?;
            let payload = STANDARD
                .decode(rest)
                .map_err(|e| FrameError::Base64(e.to_string()))?;
            Ok(Frame::new(channel, payload))
        }
    }
}

/// Decode a transport message carrying a frame
pub fn decode_message(protocol: Subprotocol, message: &WireMessage) -> Result<Frame, FrameError> {
    match message {
        WireMessage::Binary(data) => decode(protocol, data),
        WireMessage::Text(text) => decode(protocol, text.as_bytes()),
        WireMessage::Close(_) => Err(FrameError::NotAFrame("close")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frames_lead_with_the_channel_byte() {
        let msg = encode(Subprotocol::Binary, &Frame::new(Channel::Stdin, b"ls".to_vec()));
        assert_eq!(msg, WireMessage::Binary(vec![0, b'l', b's']));

        let frame = decode(Subprotocol::Binary, &[2, b'e', b'r', b'r']).unwrap();
        assert_eq!(frame, Frame::new(Channel::Stderr, b"err".to_vec()));
    }

    #[test]
    fn base64_frames_use_a_digit_and_standard_alphabet() {
        // 0xfb 0xff encodes to "+/8=" in the standard alphabet
        let msg = encode(Subprotocol::Base64, &Frame::new(Channel::Stdin, vec![0xfb, 0xff]));
        assert_eq!(msg, WireMessage::Text("0+/8=".to_string()));

        let frame = decode(Subprotocol::Base64, b"1aGVsbG8=").unwrap();
        assert_eq!(frame, Frame::new(Channel::Stdout, b"hello".to_vec()));
    }

    #[test]
    fn empty_payload_is_a_valid_frame() {
        let frame = decode(Subprotocol::Base64, b"3").unwrap();
        assert_eq!(frame.channel, Channel::Error);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn unknown_base64_channel_is_distinct_from_bad_selector() {
        assert_eq!(
            decode(Subprotocol::Base64, b"7Pw=="),
            Err(FrameError::UnknownChannel(7))
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert_eq!(decode(Subprotocol::Binary, &[]), Err(FrameError::Empty));
        assert_eq!(
            decode(Subprotocol::Binary, &[9, 1]),
            Err(FrameError::UnknownChannel(9))
        );
        assert_eq!(
            decode(Subprotocol::Base64, b"x!!"),
            Err(FrameError::Selector(b'x'))
        );
        assert!(matches!(
            decode(Subprotocol::Base64, b"1***"),
            Err(FrameError::Base64(_))
        ));
    }

    #[test]
    fn subprotocol_names() {
        assert_eq!(
            Subprotocol::from_name("base64.channel.k8s.io"),
            Some(Subprotocol::Base64)
        );
        assert_eq!(Subprotocol::from_name("channel.k8s.io"), Some(Subprotocol::Binary));
        assert_eq!(Subprotocol::from_name("v4.channel.k8s.io"), None);
        assert!(Channel::Stdout.is_output());
        assert!(!Channel::Error.is_output());
    }
}
