use super::decoder::MAX_DEPTH;
use super::marker::*;
use super::token::{self, Token};
use super::{AttrValue, Content, Node};
use crate::Error;

/// Serializes nodes into the tokenized body format.
///
/// Output depends only on the node value, so two encodings of equal nodes are identical.
pub(crate) struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buffer
    }

    pub(crate) fn write_node(&mut self, node: &Node) -> Result<(), Error> {
        self.write_node_at(node, 0)
    }

    /// Nodes the decoder would refuse for depth are refused here too.
    fn write_node_at(&mut self, node: &Node, depth: usize) -> Result<(), Error> {
        if depth >= MAX_DEPTH {
            return Err(Error::MalformedFrame(format!(
                "nesting exceeds {MAX_DEPTH} levels"
            )));
        }
        if node.tag().is_empty() {
            return Err(Error::MalformedFrame("node tag must not be empty".to_string()));
        }

        self.write_string(node.tag())?;

        let attributes = node.attributes();
        self.write_list_size(attributes.len())?;
        for (key, value) in attributes.iter() {
            self.write_string(key)?;
            match value {
                AttrValue::Text(text) => self.write_string(text)?,
                AttrValue::Bytes(bytes) => self.write_binary(bytes)?,
            }
        }

        match node.content() {
            Content::Empty => self.buffer.push(CONTENT_EMPTY),
            Content::Bytes(bytes) => {
                self.buffer.push(CONTENT_BYTES);
                self.write_binary(bytes)?;
            }
            Content::Child(child) => {
                self.buffer.push(CONTENT_CHILD);
                self.write_node_at(child, depth + 1)?;
            }
            Content::Children(children) => {
                self.buffer.push(CONTENT_CHILDREN);
                self.write_list_size(children.len())?;
                for child in children {
                    self.write_node_at(child, depth + 1)?;
                }
            }
        }

        Ok(())
    }

    fn write_string(&mut self, value: &str) -> Result<(), Error> {
        match token::lookup(value) {
            Some(Token::Single(code)) => {
                self.buffer.push(code);
                Ok(())
            }
            Some(Token::Extended(index)) => {
                self.buffer.extend_from_slice(&[token::EXTENDED_MARKER, index]);
                Ok(())
            }
            None => {
                self.write_length(value.len(), [STRING_8, STRING_16, STRING_32])?;
                self.buffer.extend_from_slice(value.as_bytes());
                Ok(())
            }
        }
    }

    fn write_binary(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.write_length(bytes.len(), [BINARY_8, BINARY_16, BINARY_32])?;
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn write_list_size(&mut self, size: usize) -> Result<(), Error> {
        self.write_length(size, [LIST_8, LIST_16, LIST_32])
    }

    /// Writes `marker ‖ length` choosing the narrowest of the three widths.
    fn write_length(&mut self, length: usize, markers: [u8; 3]) -> Result<(), Error> {
        if let Ok(length) = u8::try_from(length) {
            self.buffer.extend_from_slice(&[markers[0], length]);
        } else if let Ok(length) = u16::try_from(length) {
            self.buffer.push(markers[1]);
            self.buffer.extend_from_slice(&length.to_be_bytes());
        } else {
            let length = u32::try_from(length).map_err(|_| {
                Error::MalformedFrame(format!("length {length} does not fit a frame"))
            })?;
            self.buffer.push(markers[2]);
            self.buffer.extend_from_slice(&length.to_be_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(node: &Node) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_node(node).unwrap();
        encoder.finish()
    }

    #[test]
    fn test_dictionary_strings_take_one_byte() {
        let bytes = encode(&Node::new("iq").with_attr("type", "get"));
        assert_eq!(bytes.len(), 1 + 2 + 1 + 1 + 1);
        assert_eq!(bytes[1..3], [LIST_8, 1]);
        assert_eq!(bytes[5], CONTENT_EMPTY);
    }

    #[test]
    fn test_length_tiers() {
        let short = encode(&Node::new("x-tag").with_bytes(vec![0u8; 255]));
        assert_eq!(short[0..2], [STRING_8, 5]);
        assert_eq!(short[10..12], [BINARY_8, 255]);

        let medium = encode(&Node::new("iq").with_bytes(vec![0u8; 256]));
        assert_eq!(medium[4..7], [BINARY_16, 0x01, 0x00]);

        let large = encode(&Node::new("iq").with_bytes(vec![0u8; 65536]));
        assert_eq!(large[4..9], [BINARY_32, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_empty_tag_is_rejected() {
        let mut encoder = Encoder::new();
        let result = encoder.write_node(&Node::new("iq").with_child(Node::new("")));
        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }

    fn nested(levels: usize) -> Node {
        let mut node = Node::new("leaf");
        for _ in 1..levels {
            node = Node::new("item").with_children(vec![node]);
        }
        node
    }

    #[test]
    fn test_depth_matches_decoder_limit() {
        let deepest = nested(MAX_DEPTH);
        let frame = crate::binary::encode(&deepest).unwrap();
        assert_eq!(crate::binary::decode(&frame).unwrap(), deepest);

        let mut encoder = Encoder::new();
        let result = encoder.write_node(&nested(MAX_DEPTH + 1));
        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }
}
