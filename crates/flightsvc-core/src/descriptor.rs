//! Descriptors, descriptor keys and tickets.
//!
//! A [`Descriptor`] is what a caller sends to name a dataset. The store never
//! keys on descriptors directly; it keys on the normalized [`DescriptorKey`].
//! A [`Ticket`] is the opaque, serialized form of a key handed out by
//! discovery and redeemed by `do_get`.

use crate::error::{FlightError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Descriptor variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorType {
    Path,
    Cmd,
}

/// Caller-supplied identifier for a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Descriptor {
    /// Opaque command bytes naming a logical dataset.
    Cmd {
        #[serde(with = "hex::serde")]
        command: Vec<u8>,
    },
    /// Ordered path segments.
    Path { path: Vec<String> },
}

impl Descriptor {
    pub fn for_command(command: impl Into<Vec<u8>>) -> Self {
        Descriptor::Cmd {
            command: command.into(),
        }
    }

    pub fn for_path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Descriptor::Path {
            path: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        match self {
            Descriptor::Cmd { .. } => DescriptorType::Cmd,
            Descriptor::Path { .. } => DescriptorType::Path,
        }
    }

    pub fn key(&self) -> DescriptorKey {
        DescriptorKey::from(self)
    }
}

/// Hashable projection of a [`Descriptor`]: (type, command bytes, path).
///
/// Command keys carry an empty path; path keys carry empty command bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DescriptorKey {
    descriptor_type: DescriptorType,
    #[serde(with = "hex::serde")]
    command: Vec<u8>,
    path: Vec<String>,
}

impl DescriptorKey {
    pub fn descriptor_type(&self) -> DescriptorType {
        self.descriptor_type
    }

    pub fn command(&self) -> &[u8] {
        &self.command
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Rebuild the descriptor this key was derived from.
    pub fn to_descriptor(&self) -> Descriptor {
        match self.descriptor_type {
            DescriptorType::Cmd => Descriptor::for_command(self.command.clone()),
            DescriptorType::Path => Descriptor::for_path(self.path.iter().cloned()),
        }
    }

    /// Serialize into ticket bytes.
    pub fn encode(&self) -> Vec<u8> {
        json!({
            "descriptor_type": self.descriptor_type,
            "command": hex::encode(&self.command),
            "path": self.path,
        })
        .to_string()
        .into_bytes()
    }

    /// Parse ticket bytes produced by [`DescriptorKey::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| FlightError::InvalidTicket {
            message: e.to_string(),
        })
    }
}

impl From<&Descriptor> for DescriptorKey {
    fn from(descriptor: &Descriptor) -> Self {
        match descriptor {
            Descriptor::Cmd { command } => DescriptorKey {
                descriptor_type: DescriptorType::Cmd,
                command: command.clone(),
                path: Vec::new(),
            },
            Descriptor::Path { path } => DescriptorKey {
                descriptor_type: DescriptorType::Path,
                command: Vec::new(),
                path: path.clone(),
            },
        }
    }
}

impl fmt::Display for DescriptorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.descriptor_type {
            DescriptorType::Cmd => write!(f, "cmd:{}", String::from_utf8_lossy(&self.command)),
            DescriptorType::Path => write!(f, "path:{}", self.path.join("/")),
        }
    }
}

/// Opaque token redeemed by `do_get`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(#[serde(with = "hex::serde")] Vec<u8>);

impl Ticket {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Ticket(bytes.into())
    }

    pub fn for_key(key: &DescriptorKey) -> Self {
        Ticket(key.encode())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn decode_key(&self) -> Result<DescriptorKey> {
        DescriptorKey::decode(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(key: &DescriptorKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_path_key_ignores_construction_path() {
        let from_vec = Descriptor::for_path(vec!["stocks".to_string(), "daily".to_string()]);
        let from_array = Descriptor::for_path(["stocks", "daily"]);
        let from_slice_iter = Descriptor::for_path(["stocks", "daily"].iter().copied());

        assert_eq!(from_vec.key(), from_array.key());
        assert_eq!(from_array.key(), from_slice_iter.key());
        assert_eq!(hash_of(&from_vec.key()), hash_of(&from_array.key()));
    }

    #[test]
    fn test_command_key_normalization() {
        let key = Descriptor::for_command(b"stocks".to_vec()).key();
        assert_eq!(key.descriptor_type(), DescriptorType::Cmd);
        assert_eq!(key.command(), b"stocks");
        assert!(key.path().is_empty());

        let same = Descriptor::for_command("stocks").key();
        assert_eq!(key, same);
    }

    #[test]
    fn test_command_and_path_keys_never_collide() {
        let cmd = Descriptor::for_command("stocks").key();
        let path = Descriptor::for_path(["stocks"]).key();
        assert_ne!(cmd, path);
    }

    #[test]
    fn test_ticket_roundtrip_for_both_variants() {
        let keys = [
            Descriptor::for_command(vec![0u8, 159, 255, b'x']).key(),
            Descriptor::for_command(Vec::new()).key(),
            Descriptor::for_path(["a", "b/c", "ü"]).key(),
            Descriptor::for_path(Vec::<String>::new()).key(),
        ];
        for key in keys {
            let ticket = Ticket::for_key(&key);
            assert_eq!(ticket.decode_key().unwrap(), key);
        }
    }

    #[test]
    fn test_garbage_ticket_fails_to_decode() {
        let ticket = Ticket::new(b"('cmd', b'stocks', ())".to_vec());
        assert!(matches!(
            ticket.decode_key(),
            Err(FlightError::InvalidTicket { .. })
        ));
    }

    #[test]
    fn test_descriptor_rebuilds_from_key() {
        let descriptor = Descriptor::for_path(["x", "y"]);
        assert_eq!(descriptor.key().to_descriptor(), descriptor);
    }

    #[test]
    fn test_ticket_serializes_as_hex_string() {
        let ticket = Ticket::new(vec![0xde, 0xad]);
        let json = serde_json::to_string(&ticket).unwrap();
        assert_eq!(json, "\"dead\"");
        let back: Ticket = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ticket);
    }
}
