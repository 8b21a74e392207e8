//! Process-wide token dictionary shared with the server.
//!
//! Single-byte codes run from `1` to [`MAX_SINGLE_BYTE_CODE`]; code `n` maps to
//! `SINGLE_BYTE_TOKENS[n - 1]`. Less frequent strings live in the extended
//! table, addressed by [`EXTENDED_MARKER`] followed by one index byte.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Highest byte value interpreted as a single-byte dictionary code.
pub const MAX_SINGLE_BYTE_CODE: u8 = 0xEB;

/// Marker introducing an index into [`EXTENDED_TOKENS`].
pub const EXTENDED_MARKER: u8 = 0xEC;

pub(crate) const SINGLE_BYTE_TOKENS: &[&str] = &[
    "xmlstreamstart",
    "xmlstreamend",
    "iq",
    "message",
    "receipt",
    "presence",
    "notification",
    "ack",
    "chatstate",
    "call",
    "stream:error",
    "success",
    "failure",
    "type",
    "id",
    "to",
    "from",
    "participant",
    "recipient",
    "t",
    "v",
    "xmlns",
    "get",
    "set",
    "result",
    "error",
    "code",
    "text",
    "reason",
    "enc",
    "pkmsg",
    "msg",
    "skmsg",
    "count",
    "list",
    "item",
    "items",
    "key",
    "keys",
    "identity",
    "registration",
    "skey",
    "value",
    "signature",
    "user",
    "device",
    "devices",
    "device-identity",
    "usync",
    "query",
    "ping",
    "pong",
    "available",
    "unavailable",
    "composing",
    "paused",
    "recording",
    "read",
    "read-self",
    "played",
    "delivery",
    "retry",
    "sender",
    "inactive",
    "active",
    "offline",
    "status",
    "last",
    "name",
    "notify",
    "push_name",
    "phash",
    "edit",
    "media",
    "mediatype",
    "image",
    "video",
    "audio",
    "document",
    "sticker",
    "url",
    "hash",
    "size",
    "mimetype",
    "group",
    "groups",
    "participants",
    "admin",
    "superadmin",
    "add",
    "remove",
    "promote",
    "demote",
    "leave",
    "subject",
    "description",
    "create",
    "invite",
    "link",
    "picture",
    "preview",
    "image/jpeg",
    "contact",
    "contacts",
    "block",
    "unblock",
    "blocklist",
    "privacy",
    "props",
    "prop",
    "config",
    "version",
    "platform",
    "web",
    "true",
    "false",
    "0",
    "1",
    "2",
    "3",
    "encrypt",
    "encrypt_v2",
    "retry_count",
    "collection",
    "sync",
    "patch",
    "snapshot",
    "mutation",
    "index",
    "critical_block",
    "critical_unblock_low",
    "regular",
    "regular_high",
    "regular_low",
    "server_sync",
    "dirty",
    "clean",
    "timestamp",
    "expiration",
    "ephemeral",
    "w:p",
    "w:m",
    "w:g2",
    "w:stats",
    "w:profile:picture",
    "passive",
    "routing_info",
    "edge_routing",
    "offline_preview",
    "class",
    "chat",
    "broadcast",
    "status@broadcast",
    "direct_path",
    "media_conn",
    "host",
    "hostname",
    "auth",
    "ttl",
    "max_buckets",
    "fallback",
    "primary",
    "companion",
    "pair-device",
    "pair-success",
    "ref",
    "platform_type",
];

pub(crate) const EXTENDED_TOKENS: &[&str] = &[
    "account_sync",
    "biz",
    "verified_name",
    "verified_level",
    "catalog",
    "product",
    "order",
    "payment",
    "poll",
    "reaction",
    "revoke",
    "history",
    "history_sync",
    "peer_msg",
    "protocol",
    "decrypt-fail",
    "hide",
    "unknown",
    "missing",
    "not-authorized",
    "not-acceptable",
    "conflict",
    "gone",
    "rate-overlimit",
    "internal-server-error",
    "service-unavailable",
    "bad-request",
    "item-not-found",
    "feature-not-implemented",
    "resource-constraint",
    "disappearing_mode",
    "duration",
    "initiator",
    "setting",
    "lid",
    "username",
    "call-creator",
    "call-id",
    "offer",
    "accept",
    "reject",
    "terminate",
    "relaylatency",
    "te",
    "voip_settings",
    "audio_data",
    "video_data",
    "mute",
    "unmute",
    "pin",
    "unpin",
    "archive",
    "unarchive",
    "star",
    "unstar",
    "deleteChat",
    "deleteMessageForMe",
    "clearChat",
    "markChatAsRead",
    "contactAction",
    "pushNameSetting",
    "localeSetting",
    "securityNotificationSetting",
    "unarchiveChatsSetting",
    "timeFormatAction",
];

/// A dictionary hit for an outgoing string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Token {
    Single(u8),
    Extended(u8),
}

static TOKEN_INDEX: LazyLock<HashMap<&'static str, Token>> = LazyLock::new(|| {
    let mut index = HashMap::with_capacity(SINGLE_BYTE_TOKENS.len() + EXTENDED_TOKENS.len());
    for (position, token) in EXTENDED_TOKENS.iter().enumerate() {
        if let Ok(position) = u8::try_from(position) {
            index.insert(*token, Token::Extended(position));
        }
    }
    // Single-byte codes win over extended ones for the same string.
    for (position, token) in SINGLE_BYTE_TOKENS.iter().enumerate() {
        if let Ok(code) = u8::try_from(position + 1) {
            if code <= MAX_SINGLE_BYTE_CODE {
                index.insert(*token, Token::Single(code));
            }
        }
    }
    index
});

/// Returns the dictionary encoding for `value`, if it has one.
pub(crate) fn lookup(value: &str) -> Option<Token> {
    TOKEN_INDEX.get(value).copied()
}

/// Resolves a single-byte code. Code `0` never has an entry.
pub(crate) fn single_byte(code: u8) -> Option<&'static str> {
    if code == 0 || code > MAX_SINGLE_BYTE_CODE {
        return None;
    }
    SINGLE_BYTE_TOKENS.get(usize::from(code - 1)).copied()
}

/// Resolves an index into the extended table.
pub(crate) fn extended(index: u8) -> Option<&'static str> {
    EXTENDED_TOKENS.get(usize::from(index)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tables_have_no_duplicates() {
        let mut seen = HashSet::new();
        for token in SINGLE_BYTE_TOKENS.iter().chain(EXTENDED_TOKENS.iter()) {
            assert!(seen.insert(*token), "duplicate token {token}");
        }
    }

    #[test]
    fn test_tables_fit_their_code_space() {
        assert!(SINGLE_BYTE_TOKENS.len() <= usize::from(MAX_SINGLE_BYTE_CODE));
        assert!(EXTENDED_TOKENS.len() <= 256);
    }

    #[test]
    fn test_lookup_matches_resolution() {
        for token in SINGLE_BYTE_TOKENS {
            match lookup(token) {
                Some(Token::Single(code)) => assert_eq!(single_byte(code), Some(*token)),
                other => panic!("{token} resolved to {other:?}"),
            }
        }
        for token in EXTENDED_TOKENS {
            match lookup(token) {
                Some(Token::Extended(index)) => assert_eq!(extended(index), Some(*token)),
                other => panic!("{token} resolved to {other:?}"),
            }
        }
    }

    #[test]
    fn test_unassigned_codes() {
        assert_eq!(single_byte(0), None);
        assert_eq!(single_byte(MAX_SINGLE_BYTE_CODE), None);
        assert_eq!(extended(u8::MAX), None);
        assert_eq!(lookup("definitely-not-a-token"), None);
    }
}
