//! Binary node codec.
//!
//! A frame is a flag byte followed by one encoded node. When [`FLAG_COMPRESSED`]
//! is set the node body is zlib-deflated and must be inflated before decoding.

mod decoder;
mod encoder;
mod node;
pub mod token;

pub use node::*;

use crate::Error;
use decoder::Decoder;
use encoder::Encoder;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

/// Flag bit marking a deflated body.
pub const FLAG_COMPRESSED: u8 = 0x02;

/// Upper bound for an inflated body.
pub const MAX_INFLATED_SIZE: usize = 16 * 1024 * 1024;

pub(crate) mod marker {
    pub(crate) const CONTENT_EMPTY: u8 = 0x00;
    pub(crate) const CONTENT_BYTES: u8 = 0x01;
    pub(crate) const CONTENT_CHILD: u8 = 0x02;
    pub(crate) const CONTENT_CHILDREN: u8 = 0x03;

    pub(crate) const STRING_8: u8 = 0xF0;
    pub(crate) const STRING_16: u8 = 0xF1;
    pub(crate) const STRING_32: u8 = 0xF2;

    pub(crate) const LIST_8: u8 = 0xF8;
    pub(crate) const LIST_16: u8 = 0xF9;
    pub(crate) const LIST_32: u8 = 0xFA;

    pub(crate) const BINARY_8: u8 = 0xFC;
    pub(crate) const BINARY_16: u8 = 0xFD;
    pub(crate) const BINARY_32: u8 = 0xFE;
}

/// Encodes a node into an uncompressed frame.
pub fn encode(node: &Node) -> Result<Vec<u8>, Error> {
    let mut encoder = Encoder::new();
    encoder.write_node(node)?;
    let body = encoder.finish();

    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.push(0);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Encodes a node and deflates the body.
pub fn encode_compressed(node: &Node) -> Result<Vec<u8>, Error> {
    let mut encoder = Encoder::new();
    encoder.write_node(node)?;
    let body = encoder.finish();

    let mut deflater = ZlibEncoder::new(vec![FLAG_COMPRESSED], Compression::default());
    deflater
        .write_all(&body)
        .map_err(|err| Error::MalformedFrame(format!("deflate failed: {err}")))?;
    deflater
        .finish()
        .map_err(|err| Error::MalformedFrame(format!("deflate failed: {err}")))
}

/// Decodes a frame into a node.
pub fn decode(frame: &[u8]) -> Result<Node, Error> {
    let Some((&flags, body)) = frame.split_first() else {
        return Err(Error::MalformedFrame("empty frame".to_string()));
    };

    if flags & !FLAG_COMPRESSED != 0 {
        return Err(Error::MalformedFrame(format!("unknown frame flags {flags:#04x}")));
    }

    let result = if flags & FLAG_COMPRESSED != 0 {
        let inflated = inflate(body)?;
        Decoder::new(&inflated).read_root()
    } else {
        Decoder::new(body).read_root()
    };

    if let Err(ref err) = result {
        tracing::warn!(error = %err, frame_len = frame.len(), "rejected inbound frame");
    }
    result
}

fn inflate(body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut inflated = Vec::new();
    let limit = u64::try_from(MAX_INFLATED_SIZE)
        .map_err(|_| Error::MalformedFrame("inflate limit overflow".to_string()))?;
    ZlibDecoder::new(body)
        .take(limit + 1)
        .read_to_end(&mut inflated)
        .map_err(|err| Error::MalformedFrame(format!("inflate failed: {err}")))?;

    if inflated.len() > MAX_INFLATED_SIZE {
        return Err(Error::MalformedFrame(format!(
            "inflated body exceeds {MAX_INFLATED_SIZE} bytes"
        )));
    }
    Ok(inflated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Node {
        Node::new("message")
            .with_attr("id", "3EB0C431C26A1916B0")
            .with_attr("to", "15551234567.1:2@c.example")
            .with_attr("type", "text")
            .with_attr("phash", vec![0u8, 1, 2, 255])
            .with_children(vec![
                Node::new("enc")
                    .with_attr("v", "2")
                    .with_attr("type", "pkmsg")
                    .with_bytes(vec![7u8; 300]),
                Node::new("device-identity").with_bytes(Vec::new()),
                Node::new("meta").with_child(Node::new("ping")),
                Node::new("unicode-ταγ").with_attr("", ""),
            ])
    }

    #[test]
    fn test_roundtrip_plain_and_compressed() {
        let node = sample();
        assert_eq!(decode(&encode(&node).unwrap()).unwrap(), node);

        let compressed = encode_compressed(&node).unwrap();
        assert_eq!(compressed[0], FLAG_COMPRESSED);
        assert_eq!(decode(&compressed).unwrap(), node);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let node = sample();
        assert_eq!(encode(&node).unwrap(), encode(&node).unwrap());
        assert_eq!(
            encode_compressed(&node).unwrap(),
            encode_compressed(&node).unwrap()
        );
    }

    #[test]
    fn test_every_truncation_is_malformed() {
        let frame = encode(&sample()).unwrap();
        for cut in 0..frame.len() {
            let result = decode(&frame[..cut]);
            assert!(
                matches!(result, Err(Error::MalformedFrame(_))),
                "cut at {cut} gave {result:?}"
            );
        }
    }

    #[test]
    fn test_unknown_flags_rejected() {
        let mut frame = encode(&Node::new("iq")).unwrap();
        frame[0] = 0x01;
        assert!(matches!(decode(&frame), Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn test_garbage_compressed_body() {
        let frame = [FLAG_COMPRESSED, 0xde, 0xad, 0xbe, 0xef];
        assert!(matches!(decode(&frame), Err(Error::MalformedFrame(_))));
    }
}
