//! The admin-facing block model.
//!
//! Blocks form an append-only sequence where the array index equals the
//! block id and each block's `previousHash` commits to its predecessor's
//! marshaled bytes. Entries are only ever appended to the tip block.
//!
//! JSON field names and byte encodings (base64) match what the admin
//! surface has always served; XML uses the same serde mapping.

use {
    crate::{
        error::{LedgerError, Result},
        hash::Hash,
    },
    base64::engine::general_purpose::STANDARD as BASE64,
    rand::RngCore,
    serde::{Deserialize, Serialize},
};

/// An entry posted into a block through the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainEntry {
    /// Application-defined entry kind.
    pub entry_type: u32,
    /// Opaque payload, base64 in JSON/XML.
    #[serde(with = "base64_bytes")]
    pub structured_data: Vec<u8>,
    /// Detached signatures over the payload.
    #[serde(default)]
    pub signatures: Vec<EntrySig>,
    /// Unix seconds, stamped server-side at POST time.
    #[serde(default)]
    pub time_stamp: i64,
}

/// A detached signature carried by a [`PlainEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySig {
    /// Raw signature bytes, base64 in JSON/XML.
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

/// One block of the admin-visible chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Position in the chain; equals the array index.
    #[serde(rename = "blockID")]
    pub block_id: u64,
    /// Hash of the predecessor's marshaled bytes; `None` only for genesis.
    pub previous_hash: Option<Hash>,
    pub entries: Vec<PlainEntry>,
    /// Per-block randomness mixed into the hash.
    pub salt: Hash,
}

impl Block {
    /// The genesis block: id 0, no parent, fixed zero salt.
    pub fn genesis() -> Self {
        Self { block_id: 0, previous_hash: None, entries: Vec::new(), salt: Hash::zero() }
    }

    /// Build the successor of `prev` with a fresh random salt.
    pub fn next_after(prev: &Block) -> Self {
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        Self {
            block_id: prev.block_id + 1,
            previous_hash: Some(prev.hash()),
            entries: Vec::new(),
            salt: Hash::from_bytes(salt),
        }
    }

    pub fn add_entry(&mut self, entry: PlainEntry) {
        self.entries.push(entry);
    }

    /// Deterministic binary form the chain hash commits to.
    pub fn marshal_binary(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.block_id.to_be_bytes());
        match &self.previous_hash {
            Some(hash) => {
                buf.push(1);
                hash.write_to(&mut buf);
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&(self.entries.len() as u64).to_be_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.entry_type.to_be_bytes());
            buf.extend_from_slice(&(entry.structured_data.len() as u32).to_be_bytes());
            buf.extend_from_slice(&entry.structured_data);
            buf.extend_from_slice(&(entry.signatures.len() as u32).to_be_bytes());
            for sig in &entry.signatures {
                buf.extend_from_slice(&(sig.bytes.len() as u32).to_be_bytes());
                buf.extend_from_slice(&sig.bytes);
            }
            buf.extend_from_slice(&entry.time_stamp.to_be_bytes());
        }
        self.salt.write_to(&mut buf);
        buf
    }

    pub fn hash(&self) -> Hash {
        Hash::sha(&self.marshal_binary())
    }
}

/// Check the append-only chain invariants: ids index the array and every
/// block after genesis commits to its predecessor.
pub fn verify_chain(blocks: &[Block]) -> Result<()> {
    for (i, block) in blocks.iter().enumerate() {
        if block.block_id != i as u64 {
            return Err(LedgerError::BrokenChain {
                block_id: block.block_id,
                reason: format!("id does not match index {i}"),
            });
        }
        if i == 0 {
            continue;
        }
        let expected = blocks[i - 1].hash();
        if block.previous_hash != Some(expected) {
            return Err(LedgerError::BrokenChain {
                block_id: block.block_id,
                reason: "previousHash does not commit to predecessor".into(),
            });
        }
    }
    Ok(())
}

mod base64_bytes {
    use {
        super::BASE64,
        base64::Engine as _,
        serde::{de, Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded.as_bytes()).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(data: &[u8]) -> PlainEntry {
        PlainEntry {
            entry_type: 2,
            structured_data: data.to_vec(),
            signatures: Vec::new(),
            time_stamp: 0,
        }
    }

    #[test]
    fn test_chain_construction_verifies() {
        let genesis = Block::genesis();
        let mut second = Block::next_after(&genesis);
        second.add_entry(entry(&[1, 2, 3]));
        let third = Block::next_after(&second);
        verify_chain(&[genesis, second, third]).unwrap();
    }

    #[test]
    fn test_broken_id_detected() {
        let genesis = Block::genesis();
        let mut second = Block::next_after(&genesis);
        second.block_id = 5;
        assert!(verify_chain(&[genesis, second]).is_err());
    }

    #[test]
    fn test_tampered_link_detected() {
        let genesis = Block::genesis();
        let mut second = Block::next_after(&genesis);
        second.previous_hash = Some(Hash::sha(b"somewhere else"));
        assert!(verify_chain(&[genesis, second]).is_err());
    }

    #[test]
    fn test_hash_covers_entries() {
        let genesis = Block::genesis();
        let mut a = Block::next_after(&genesis);
        let b = a.clone();
        a.add_entry(entry(&[9]));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_entry_json_uses_base64_and_camel_case() {
        let json = r#"{"entryType":2,"structuredData":"AQID","signatures":[]}"#;
        let decoded: PlainEntry = serde_json::from_str(json).unwrap();
        assert_eq!(decoded.entry_type, 2);
        assert_eq!(decoded.structured_data, vec![1, 2, 3]);
        assert_eq!(decoded.time_stamp, 0);

        let encoded = serde_json::to_string(&decoded).unwrap();
        assert!(encoded.contains(r#""structuredData":"AQID""#));
        assert!(encoded.contains(r#""timeStamp":0"#));
    }

    #[test]
    fn test_entry_xml_roundtrip() {
        let original = PlainEntry {
            entry_type: 7,
            structured_data: vec![4, 5, 6],
            signatures: vec![EntrySig { bytes: vec![1; 4] }],
            time_stamp: 99,
        };
        let xml = quick_xml::se::to_string(&original).unwrap();
        let decoded: PlainEntry = quick_xml::de::from_str(&xml).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_block_json_matches_served_shape() {
        let block = Block::genesis();
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["blockID"], 0);
        assert!(json["previousHash"].is_null());
        assert_eq!(json["salt"]["bytes"], "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=");
    }
}
