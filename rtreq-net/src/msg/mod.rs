//! Message definition and the codec used to put it on the wire.
//!
//! A single `Message` always travels as a single frame. There is no
//! chunking and no compression, what gets encoded is exactly one
//! `(sender, payload)` record.

use std::convert::TryFrom;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::socket::{pack, unpack, Encoding};
use crate::{Error, Result};

/// Unit of communication between endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Message {
    /// Name of the endpoint that sent the message
    sender: String,
    /// Message body
    payload: String,
}

impl Message {
    pub fn new(sender: &str, payload: &str) -> Self {
        Self {
            sender: sender.to_string(),
            payload: payload.to_string(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn into_parts(self) -> (String, String) {
        (self.sender, self.payload)
    }

    /// Serialize into a single frame using the given encoding.
    pub fn to_bytes(&self, encoding: &Encoding) -> Result<Vec<u8>> {
        pack(self, encoding)
    }

    /// Deserialize from a single frame using the given encoding.
    pub fn from_bytes(bytes: &[u8], encoding: &Encoding) -> Result<Message> {
        unpack(bytes, encoding)
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "sender:{:?} message:{:?}", self.sender, self.payload)
    }
}

impl TryFrom<&[u8]> for Message {
    type Error = Error;
    fn try_from(bytes: &[u8]) -> Result<Message> {
        Message::from_bytes(bytes, &Encoding::default())
    }
}

/// Encodes a `(sender, payload)` pair into a frame.
pub fn encode(sender: &str, payload: &str, encoding: &Encoding) -> Result<Vec<u8>> {
    Message::new(sender, payload).to_bytes(encoding)
}

/// Decodes a frame back into a `(sender, payload)` pair.
pub fn decode(bytes: &[u8], encoding: &Encoding) -> Result<(String, String)> {
    Ok(Message::from_bytes(bytes, encoding)?.into_parts())
}

#[test]
fn codec_round_trip() {
    let bytes = encode("alpha", "ping", &Encoding::Bincode).unwrap();
    let (sender, payload) = decode(&bytes, &Encoding::Bincode).unwrap();
    assert_eq!(sender, "alpha");
    assert_eq!(payload, "ping");
}

#[test]
fn codec_empty_payload() {
    let bytes = encode("alpha", "", &Encoding::Bincode).unwrap();
    let msg = Message::from_bytes(&bytes, &Encoding::Bincode).unwrap();
    assert_eq!(msg, Message::new("alpha", ""));
}

#[test]
fn codec_unicode() {
    let msg = Message::new("węzeł-1", "ünïcødé ✓");
    let bytes = msg.to_bytes(&Encoding::Bincode).unwrap();
    assert_eq!(Message::try_from(bytes.as_slice()).unwrap(), msg);
}

#[test]
fn codec_rejects_garbage() {
    match decode(&[0xff, 0x01], &Encoding::Bincode) {
        Err(Error::MalformedMessage(_)) => (),
        other => panic!("expected malformed message, got {:?}", other),
    }
}

#[test]
fn codec_rejects_truncated_frame() {
    let bytes = encode("alpha", "some longer payload", &Encoding::Bincode).unwrap();
    let truncated = &bytes[..bytes.len() - 4];
    assert!(matches!(
        decode(truncated, &Encoding::Bincode),
        Err(Error::MalformedMessage(_))
    ));
}

#[cfg(feature = "json_encoding")]
#[test]
fn codec_json_round_trip() {
    let bytes = encode("alpha", "ping", &Encoding::Json).unwrap();
    assert_eq!(
        decode(&bytes, &Encoding::Json).unwrap(),
        ("alpha".to_string(), "ping".to_string())
    );
}
