use super::marker::*;
use super::token;
use super::{AttrValue, Attributes, Content, Node};
use crate::Error;

/// Nodes nested deeper than this are rejected instead of recursing further.
pub(crate) const MAX_DEPTH: usize = 64;

/// Reads one node from a body produced by [`super::encoder::Encoder`].
///
/// Works on a borrowed slice and builds owned values only once each piece is
/// complete, so a failure never yields a partial node.
pub(crate) struct Decoder<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(input: &'a [u8]) -> Self {
        Self { input, position: 0 }
    }

    /// Decodes exactly one node and requires the input to be fully consumed.
    pub(crate) fn read_root(mut self) -> Result<Node, Error> {
        let node = self.read_node(0)?;
        if self.position != self.input.len() {
            return Err(Error::MalformedFrame(format!(
                "{} trailing bytes after root node",
                self.input.len() - self.position
            )));
        }
        Ok(node)
    }

    fn read_node(&mut self, depth: usize) -> Result<Node, Error> {
        if depth >= MAX_DEPTH {
            return Err(Error::MalformedFrame(format!(
                "nesting exceeds {MAX_DEPTH} levels"
            )));
        }

        let tag = self.read_string()?;
        if tag.is_empty() {
            return Err(Error::MalformedFrame("empty node tag".to_string()));
        }

        let attribute_count = self.read_list_size()?;
        let mut attributes = Attributes::new();
        for _ in 0..attribute_count {
            let key = self.read_string()?;
            let value = self.read_attr_value()?;
            if !attributes.push_unique(key, value) {
                return Err(Error::MalformedFrame(format!(
                    "duplicate attribute on <{tag}>"
                )));
            }
        }

        let content = match self.read_u8()? {
            CONTENT_EMPTY => Content::Empty,
            CONTENT_BYTES => {
                let marker = self.read_u8()?;
                Content::Bytes(self.read_binary(marker)?.to_vec())
            }
            CONTENT_CHILD => Content::Child(Box::new(self.read_node(depth + 1)?)),
            CONTENT_CHILDREN => {
                let count = self.read_list_size()?;
                // Every child needs at least three bytes, so cap the preallocation by what remains.
                let mut children = Vec::with_capacity(count.min(self.remaining() / 3));
                for _ in 0..count {
                    children.push(self.read_node(depth + 1)?);
                }
                Content::Children(children)
            }
            other => {
                return Err(Error::MalformedFrame(format!(
                    "unknown content kind {other:#04x}"
                )));
            }
        };

        Ok(Node::from_parts(tag, attributes, content))
    }

    fn read_attr_value(&mut self) -> Result<AttrValue, Error> {
        let marker = self.read_u8()?;
        match marker {
            BINARY_8 | BINARY_16 | BINARY_32 => Ok(AttrValue::Bytes(self.read_binary(marker)?.to_vec())),
            _ => Ok(AttrValue::Text(self.read_string_with(marker)?)),
        }
    }

    fn read_string(&mut self) -> Result<String, Error> {
        let marker = self.read_u8()?;
        self.read_string_with(marker)
    }

    fn read_string_with(&mut self, marker: u8) -> Result<String, Error> {
        match marker {
            STRING_8 | STRING_16 | STRING_32 => {
                let length = self.read_length(marker)?;
                let raw = self.take(length)?;
                String::from_utf8(raw.to_vec())
                    .map_err(|_| Error::MalformedFrame("raw string is not UTF-8".to_string()))
            }
            token::EXTENDED_MARKER => {
                let index = self.read_u8()?;
                token::extended(index)
                    .map(str::to_string)
                    .ok_or(Error::UnknownDictionaryCode(
                        (u16::from(token::EXTENDED_MARKER) << 8) | u16::from(index),
                    ))
            }
            code if code <= token::MAX_SINGLE_BYTE_CODE => token::single_byte(code)
                .map(str::to_string)
                .ok_or(Error::UnknownDictionaryCode(u16::from(code))),
            other => Err(Error::MalformedFrame(format!(
                "unexpected string marker {other:#04x}"
            ))),
        }
    }

    fn read_binary(&mut self, marker: u8) -> Result<&'a [u8], Error> {
        match marker {
            BINARY_8 | BINARY_16 | BINARY_32 => {
                let length = self.read_length(marker)?;
                self.take(length)
            }
            other => Err(Error::MalformedFrame(format!(
                "unexpected binary marker {other:#04x}"
            ))),
        }
    }

    fn read_list_size(&mut self) -> Result<usize, Error> {
        let marker = self.read_u8()?;
        match marker {
            LIST_8 | LIST_16 | LIST_32 => self.read_length(marker),
            other => Err(Error::MalformedFrame(format!(
                "unexpected list marker {other:#04x}"
            ))),
        }
    }

    /// Reads the length that follows a sized marker; the marker picks the width.
    fn read_length(&mut self, marker: u8) -> Result<usize, Error> {
        match marker {
            STRING_8 | BINARY_8 | LIST_8 => Ok(usize::from(self.read_u8()?)),
            STRING_16 | BINARY_16 | LIST_16 => {
                let bytes = self.take(2)?;
                Ok(usize::from(u16::from_be_bytes([bytes[0], bytes[1]])))
            }
            STRING_32 | BINARY_32 | LIST_32 => {
                let bytes = self.take(4)?;
                let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                usize::try_from(length)
                    .map_err(|_| Error::MalformedFrame(format!("length {length} too large")))
            }
            other => Err(Error::MalformedFrame(format!(
                "marker {other:#04x} carries no length"
            ))),
        }
    }

    fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8], Error> {
        if length > self.remaining() {
            return Err(Error::MalformedFrame(format!(
                "declared length {length} exceeds {} remaining bytes",
                self.remaining()
            )));
        }
        let input = self.input;
        let slice = &input[self.position..self.position + length];
        self.position += length;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Result<Node, Error> {
        Decoder::new(bytes).read_root()
    }

    #[test]
    fn test_minimal_node() {
        // "iq", no attributes, empty content
        let node = decode(&[3, LIST_8, 0, CONTENT_EMPTY]).unwrap();
        assert_eq!(node, Node::new("iq"));
    }

    #[test]
    fn test_unknown_dictionary_codes() {
        assert_eq!(
            decode(&[0, LIST_8, 0, CONTENT_EMPTY]),
            Err(Error::UnknownDictionaryCode(0))
        );
        assert_eq!(
            decode(&[token::MAX_SINGLE_BYTE_CODE, LIST_8, 0, CONTENT_EMPTY]),
            Err(Error::UnknownDictionaryCode(u16::from(token::MAX_SINGLE_BYTE_CODE)))
        );
        assert_eq!(
            decode(&[token::EXTENDED_MARKER, 0xFF, LIST_8, 0, CONTENT_EMPTY]),
            Err(Error::UnknownDictionaryCode(0xECFF))
        );
    }

    #[test]
    fn test_length_beyond_input() {
        let result = decode(&[3, LIST_8, 0, CONTENT_BYTES, BINARY_8, 10, 1, 2, 3]);
        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn test_unknown_content_kind() {
        let result = decode(&[3, LIST_8, 0, 0x09]);
        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn test_duplicate_attribute() {
        // <iq type="get" type="set"/>
        let result = decode(&[3, LIST_8, 2, 14, 23, 14, 24, CONTENT_EMPTY]);
        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn test_trailing_bytes() {
        let result = decode(&[3, LIST_8, 0, CONTENT_EMPTY, 0]);
        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn test_depth_limit() {
        let mut bytes = Vec::new();
        for _ in 0..MAX_DEPTH + 1 {
            bytes.extend_from_slice(&[3, LIST_8, 0, CONTENT_CHILD]);
        }
        bytes.extend_from_slice(&[3, LIST_8, 0, CONTENT_EMPTY]);
        assert!(matches!(decode(&bytes), Err(Error::MalformedFrame(_))));
    }
}
