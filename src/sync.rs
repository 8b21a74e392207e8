//! Index extraction for synced app-state actions.

pub use crate::proto::SyncActionData;

use crate::Error;
use prost::Message;

/// Key an app-state action is indexed under: the action name followed by its
/// arguments, e.g. `["mute", "15551234567@s.example"]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageIndex {
    pub action: String,
    pub arguments: Vec<String>,
}

impl SyncActionData {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Self::decode(bytes).map_err(|err| Error::Serde(format!("Failed to decode sync action: {err}")))
    }

    /// Parses the index bytes, a UTF-8 JSON array of strings.
    pub fn message_index(&self) -> Result<MessageIndex, Error> {
        let mut parts: Vec<String> = serde_json::from_slice(&self.index)
            .map_err(|err| Error::Serde(format!("invalid sync index: {err}")))?;
        if parts.is_empty() {
            return Err(Error::Serde("empty sync index".to_string()));
        }

        let action = parts.remove(0);
        Ok(MessageIndex {
            action,
            arguments: parts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(index: &[u8]) -> SyncActionData {
        SyncActionData {
            index: index.to_vec(),
            value: Vec::new(),
            padding: Vec::new(),
            version: 1,
        }
    }

    #[test]
    fn test_message_index() {
        let data = action(br#"["star","15551234567@s.example","3EB0C431C26A1916B0","1","0"]"#);
        let index = data.message_index().unwrap();
        assert_eq!(index.action, "star");
        assert_eq!(index.arguments.len(), 4);
        assert_eq!(index.arguments[0], "15551234567@s.example");

        let decoded = SyncActionData::from_bytes(&data.encode_to_vec()).unwrap();
        assert_eq!(decoded.message_index().unwrap(), index);
    }

    #[test]
    fn test_invalid_index() {
        let cases: [&[u8]; 5] = [b"not json", b"{}", b"[1, 2]", b"[]", &[0xFF, 0xFE]];
        for index in cases {
            assert!(matches!(action(index).message_index(), Err(Error::Serde(_))));
        }
    }
}
