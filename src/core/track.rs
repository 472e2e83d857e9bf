//! Track payloads distributed to players.
//!
//! A track travels as its base62 export string. The identifier announced
//! before the chunks is the lowercase hex SHA-256 of those bytes, which lets a
//! receiver tell when reassembly is complete without an end marker.

use sha2::{Digest, Sha256};
use std::fmt::{self, Write as _};

use crate::error::TrackError;

/// Opaque track identifier carried by the announcement frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackId(String);

impl TrackId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier of an exported track: hex SHA-256 of its bytes.
    pub fn for_content(content: &[u8]) -> Self {
        Self::from_digest(&Sha256::digest(content))
    }

    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            // Writing to a String cannot fail
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the chunked transfer needs from a track.
pub trait TrackSource {
    /// Resolve the identifier announced before the chunks
    fn track_id(&self) -> Result<TrackId, TrackError>;

    /// Full exported content, sent verbatim in chunk frames
    fn export_bytes(&self) -> &[u8];
}

/// A track held as its base62 export string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    export_string: String,
}

impl Track {
    pub fn new(export_string: impl Into<String>) -> Self {
        Self {
            export_string: export_string.into(),
        }
    }

    pub fn export_string(&self) -> &str {
        &self.export_string
    }

    pub fn len(&self) -> usize {
        self.export_string.len()
    }

    pub fn is_empty(&self) -> bool {
        self.export_string.is_empty()
    }
}

impl TrackSource for Track {
    fn track_id(&self) -> Result<TrackId, TrackError> {
        if self.export_string.is_empty() {
            return Err(TrackError::Empty);
        }
        if let Some((position, &byte)) = self
            .export_string
            .as_bytes()
            .iter()
            .enumerate()
            .find(|(_, b)| !b.is_ascii_alphanumeric())
        {
            return Err(TrackError::InvalidCharacter { position, byte });
        }
        Ok(TrackId::for_content(self.export_string.as_bytes()))
    }

    fn export_bytes(&self) -> &[u8] {
        self.export_string.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_hex_sha256_of_export() {
        let track = Track::new("abc");
        let id = track.track_id().unwrap();
        assert_eq!(
            id.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn empty_track_has_no_id() {
        assert_eq!(Track::new("").track_id(), Err(TrackError::Empty));
    }

    #[test]
    fn non_base62_rejected() {
        assert_eq!(
            Track::new("ab-c").track_id(),
            Err(TrackError::InvalidCharacter {
                position: 2,
                byte: b'-'
            })
        );
    }
}
