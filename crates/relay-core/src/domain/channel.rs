//! Channel names and kinds.
//!
//! A channel is identified by its name inside one application.  The kind is
//! not stored anywhere: it is derived from the name prefix every time.
//!
//! ```text
//! presence-room-1   → Presence   (auth required, member tracking)
//! private-orders    → Private    (auth required)
//! news              → Public     (anyone may subscribe)
//! ```

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Longest channel name accepted anywhere in the relay.
pub const MAX_CHANNEL_NAME_LEN: usize = 200;

const PRIVATE_PREFIX: &str = "private-";
const PRESENCE_PREFIX: &str = "presence-";

/// The subscription semantics of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Public,
    Private,
    Presence,
}

impl ChannelKind {
    /// Derives the kind from a raw channel name.
    ///
    /// `private-encrypted-*` channels are private channels as far as the
    /// relay is concerned; the payload encryption is end to end.
    pub fn of(name: &str) -> Self {
        if name.starts_with(PRESENCE_PREFIX) {
            ChannelKind::Presence
        } else if name.starts_with(PRIVATE_PREFIX) {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        }
    }

    /// Private and presence channels need a signed proof to subscribe.
    pub fn requires_auth(self) -> bool {
        !matches!(self, ChannelKind::Public)
    }
}

/// A syntactically valid channel name.
///
/// Construct with [`ChannelName::parse`]; once you hold one, the length and
/// character rules are guaranteed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Validates `name` against the Pusher channel-name rules.
    ///
    /// Allowed characters are ASCII letters, digits, and `_ - = @ , . ;`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidChannelName`] for empty names, names
    /// longer than [`MAX_CHANNEL_NAME_LEN`], or names with other characters.
    pub fn parse(name: &str) -> Result<Self, ChannelError> {
        if name.is_empty() || name.len() > MAX_CHANNEL_NAME_LEN {
            return Err(ChannelError::InvalidChannelName(truncate_for_log(name)));
        }
        if !name.bytes().all(is_allowed_byte) {
            return Err(ChannelError::InvalidChannelName(truncate_for_log(name)));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> ChannelKind {
        ChannelKind::of(&self.0)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ChannelName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ChannelName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ChannelName::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn is_allowed_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'=' | b'@' | b',' | b'.' | b';')
}

/// Keeps error messages bounded when a client sends a huge name.
fn truncate_for_log(name: &str) -> String {
    name.chars().take(MAX_CHANNEL_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_derived_from_prefix() {
        assert_eq!(ChannelKind::of("news"), ChannelKind::Public);
        assert_eq!(ChannelKind::of("private-orders"), ChannelKind::Private);
        assert_eq!(ChannelKind::of("private-encrypted-x"), ChannelKind::Private);
        assert_eq!(ChannelKind::of("presence-room1"), ChannelKind::Presence);
        // The prefix must match exactly, including the dash.
        assert_eq!(ChannelKind::of("privatechat"), ChannelKind::Public);
    }

    #[test]
    fn test_only_public_channels_skip_auth() {
        assert!(!ChannelKind::Public.requires_auth());
        assert!(ChannelKind::Private.requires_auth());
        assert!(ChannelKind::Presence.requires_auth());
    }

    #[test]
    fn test_parse_accepts_every_allowed_punctuation_character() {
        let name = ChannelName::parse("a_b-c=d@e,f.g;h").unwrap();
        assert_eq!(name.as_str(), "a_b-c=d@e,f.g;h");
    }

    #[test]
    fn test_parse_rejects_empty_name() {
        assert!(matches!(
            ChannelName::parse(""),
            Err(ChannelError::InvalidChannelName(_))
        ));
    }

    #[test]
    fn test_parse_rejects_disallowed_characters() {
        for bad in ["has space", "slash/name", "star*", "ünicode", "new\nline"] {
            assert!(
                ChannelName::parse(bad).is_err(),
                "{bad:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_parse_enforces_length_limit() {
        let at_limit = "a".repeat(MAX_CHANNEL_NAME_LEN);
        let over_limit = "a".repeat(MAX_CHANNEL_NAME_LEN + 1);
        assert!(ChannelName::parse(&at_limit).is_ok());
        assert!(ChannelName::parse(&over_limit).is_err());
    }

    #[test]
    fn test_deserialize_validates_name() {
        let ok: Result<ChannelName, _> = serde_json::from_str("\"presence-room1\"");
        assert_eq!(ok.unwrap().kind(), ChannelKind::Presence);

        let bad: Result<ChannelName, _> = serde_json::from_str("\"bad name\"");
        assert!(bad.is_err());
    }
}
