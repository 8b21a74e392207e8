//! The `<enc>` node that carries cipher output inside a message stanza.

use crate::binary::Node;
use crate::ratchet::CiphertextMessage;
use crate::Error;

pub const ENC_TAG: &str = "enc";
pub const ENC_VERSION: &str = "2";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Carries a handshake, `type="pkmsg"`.
    PreKey,
    /// Plain session message, `type="msg"`.
    Message,
}

impl EnvelopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::PreKey => "pkmsg",
            EnvelopeKind::Message => "msg",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pkmsg" => Some(EnvelopeKind::PreKey),
            "msg" => Some(EnvelopeKind::Message),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn from_ciphertext(message: &CiphertextMessage) -> Result<Self, Error> {
        let kind = match message {
            CiphertextMessage::PreKey(_) => EnvelopeKind::PreKey,
            CiphertextMessage::Whisper(_) => EnvelopeKind::Message,
        };
        Ok(Self {
            kind,
            payload: message.to_bytes()?,
        })
    }

    pub fn to_node(&self) -> Node {
        Node::new(ENC_TAG)
            .with_attr("v", ENC_VERSION)
            .with_attr("type", self.kind.as_str())
            .with_bytes(self.payload.clone())
    }

    /// Reads an `<enc>` node, or the first `<enc>` child of a message node.
    pub fn from_node(node: &Node) -> Result<Self, Error> {
        let enc = if node.tag() == ENC_TAG {
            node
        } else {
            node.child(ENC_TAG).ok_or_else(|| {
                Error::MalformedFrame(format!("<{}> carries no <{ENC_TAG}> child", node.tag()))
            })?
        };

        match enc.attr_str("v") {
            Some(ENC_VERSION) => {}
            other => {
                return Err(Error::MalformedFrame(format!(
                    "unsupported <{ENC_TAG}> version {other:?}"
                )));
            }
        }

        let kind = enc
            .attr_str("type")
            .and_then(EnvelopeKind::parse)
            .ok_or_else(|| {
                Error::MalformedFrame(format!(
                    "unsupported <{ENC_TAG}> type {:?}",
                    enc.attr_str("type")
                ))
            })?;

        let payload = enc
            .bytes()
            .ok_or_else(|| Error::MalformedFrame(format!("<{ENC_TAG}> without payload")))?;

        Ok(Self {
            kind,
            payload: payload.to_vec(),
        })
    }
}
