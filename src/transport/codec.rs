//! Text encoding of group events for the datagram transport.
//!
//! Format: `device.title.country:window`, ASCII, no escaping.

use thiserror::Error;

use crate::event::{GroupEvent, GroupKey};

/// Separator between the joined key and the window index.
pub const WINDOW_DELIMITER: char = ':';

/// Errors that can occur while decoding a group event datagram.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    #[error("datagram has no window delimiter")]
    MissingWindow,

    #[error("invalid window index {raw:?}")]
    InvalidWindow { raw: String },

    #[error("group key {raw:?} does not have three fields")]
    InvalidKey { raw: String },
}

/// Encode an event into `out`, replacing its previous contents.
pub fn encode_into(event: &GroupEvent, out: &mut String) {
    out.clear();
    event.key.write_joined(out);
    out.push(WINDOW_DELIMITER);
    out.push_str(&event.window.to_string());
}

/// Encode an event into a fresh string.
pub fn encode(event: &GroupEvent) -> String {
    let mut out = String::with_capacity(64);
    encode_into(event, &mut out);
    out
}

/// Decode a datagram body into an event.
///
/// The window is taken after the last `:` so a colon inside a key field
/// does not shift the index.
pub fn decode(data: &[u8]) -> Result<GroupEvent, DecodeError> {
    let text = std::str::from_utf8(data).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim_end_matches(['\n', '\r', '\0']);

    let (joined, raw_window) = text
        .rsplit_once(WINDOW_DELIMITER)
        .ok_or(DecodeError::MissingWindow)?;

    let window = raw_window
        .parse::<i64>()
        .map_err(|_| DecodeError::InvalidWindow {
            raw: raw_window.to_string(),
        })?;

    let key = GroupKey::from_joined(joined).ok_or_else(|| DecodeError::InvalidKey {
        raw: joined.to_string(),
    })?;

    Ok(GroupEvent { key, window })
}
