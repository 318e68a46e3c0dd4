//! The database catalogue.
//!
//! The manifest lists every collection with its properties and index
//! definitions. It is small and rewritten whole on every catalogue change.
//!
//! ```text
//! | magic "SMFN" | version u16 LE | crc32 u32 LE | CBOR payload |
//! ```

use crate::collection::CollectionProperties;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexDefinition;
use crate::types::{CollectionId, IndexId};
use serde::{Deserialize, Serialize};

/// Magic bytes at the start of the manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"SMFN";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

const HEADER_SIZE: usize = 10;

/// One collection as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    /// Collection id; names the `collection-<id>` directory.
    pub id: CollectionId,
    /// Collection name.
    pub name: String,
    /// Collection properties.
    pub properties: CollectionProperties,
    /// Secondary index definitions in declaration order.
    pub indexes: Vec<IndexDefinition>,
    /// Next index id to assign.
    pub next_index_id: u64,
}

impl CollectionEntry {
    /// Assigns the next index id to `definition`.
    pub fn assign_index_id(&mut self, mut definition: IndexDefinition) -> IndexDefinition {
        definition.id = IndexId::new(self.next_index_id);
        self.next_index_id += 1;
        definition
    }
}

/// Database manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Collections in creation order.
    pub collections: Vec<CollectionEntry>,
    /// Next collection id to assign.
    pub next_collection_id: u64,
    /// Highest tick handed out when the manifest was written.
    ///
    /// Keeps ticks monotonic even when compaction removed every marker
    /// that carried the highest one.
    #[serde(default)]
    pub last_tick: u64,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: Vec::new(),
            next_collection_id: 1,
            last_tick: 0,
        }
    }

    /// Looks a collection up by name.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionEntry> {
        self.collections.iter().find(|entry| entry.name == name)
    }

    /// Mutable lookup by name.
    pub fn collection_mut(&mut self, name: &str) -> Option<&mut CollectionEntry> {
        self.collections.iter_mut().find(|entry| entry.name == name)
    }

    /// Registers a new collection and returns its entry.
    ///
    /// # Errors
    ///
    /// Returns `CollectionExists` if the name is taken.
    pub fn add_collection(
        &mut self,
        name: &str,
        properties: CollectionProperties,
    ) -> CoreResult<&CollectionEntry> {
        if self.collection(name).is_some() {
            return Err(CoreError::CollectionExists {
                name: name.to_string(),
            });
        }
        let id = CollectionId::new(self.next_collection_id);
        self.next_collection_id += 1;
        self.collections.push(CollectionEntry {
            id,
            name: name.to_string(),
            properties,
            indexes: Vec::new(),
            next_index_id: 1,
        });
        let last = self.collections.len() - 1;
        Ok(&self.collections[last])
    }

    /// Removes a collection and returns its entry.
    pub fn remove_collection(&mut self, name: &str) -> Option<CollectionEntry> {
        let position = self.collections.iter().position(|entry| entry.name == name)?;
        Some(self.collections.remove(position))
    }

    /// Encodes the manifest with its header.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::ser::into_writer(self, &mut payload)
            .map_err(|e| CoreError::internal(format!("manifest encoding failed: {e}")))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decodes a manifest written by [`Manifest::encode`].
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` on a bad header or payload and
    /// `ChecksumMismatch` if the payload does not match its CRC.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < HEADER_SIZE || data[0..4] != MANIFEST_MAGIC {
            return Err(CoreError::corrupt("invalid manifest magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > MANIFEST_VERSION {
            return Err(CoreError::corrupt(format!(
                "unsupported manifest version: {version}"
            )));
        }
        let expected = u32::from_le_bytes([data[6], data[7], data[8], data[9]]);
        let payload = &data[HEADER_SIZE..];
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }
        ciborium::de::from_reader(payload)
            .map_err(|e| CoreError::corrupt(format!("manifest payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        let mut manifest = Manifest::new();
        manifest
            .add_collection("users", CollectionProperties::new())
            .unwrap();
        manifest
            .add_collection("events", CollectionProperties::new().is_volatile(true))
            .unwrap();
        let entry = manifest.collection_mut("users").unwrap();
        let definition = entry.assign_index_id(IndexDefinition::new("by_email", ["email"]).unique());
        entry.indexes.push(definition);
        manifest.last_tick = 99;
        manifest
    }

    #[test]
    fn ids_are_assigned_in_order() {
        let manifest = sample();
        assert_eq!(manifest.collection("users").unwrap().id, CollectionId::new(1));
        assert_eq!(manifest.collection("events").unwrap().id, CollectionId::new(2));
        assert_eq!(manifest.next_collection_id, 3);
        assert_eq!(
            manifest.collection("users").unwrap().indexes[0].id,
            IndexId::new(1)
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut manifest = sample();
        let result = manifest.add_collection("users", CollectionProperties::new());
        assert!(matches!(result, Err(CoreError::CollectionExists { .. })));
    }

    #[test]
    fn removed_ids_are_not_reused() {
        let mut manifest = sample();
        let removed = manifest.remove_collection("events").unwrap();
        assert_eq!(removed.id, CollectionId::new(2));
        let id = manifest
            .add_collection("events", CollectionProperties::new())
            .unwrap()
            .id;
        assert_eq!(id, CollectionId::new(3));
    }

    #[test]
    fn encoded_manifest_decodes() {
        let manifest = sample();
        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn damaged_manifest_is_detected() {
        let mut bytes = sample().encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Manifest::decode(&bytes),
            Err(CoreError::ChecksumMismatch { .. })
        ));

        assert!(Manifest::decode(b"nope").unwrap_err().is_corruption());

        let mut future = sample().encode().unwrap();
        future[4] = 0xFF;
        assert!(Manifest::decode(&future).unwrap_err().is_corruption());
    }
}
