//! The 33-byte hash primitive.
//!
//! Every hash-valued field in a marshaled ledger structure occupies 33
//! bytes on the wire: a one-byte length prefix (always 32) followed by the
//! SHA-256 digest. In JSON the digest travels base64-encoded under a
//! `bytes` key, matching what the admin surface serves.

use {
    crate::error::{LedgerError, Result},
    base64::{engine::general_purpose::STANDARD as BASE64, Engine as _},
    serde::{de, Deserialize, Deserializer, Serialize, Serializer},
    sha2::{Digest, Sha256},
    std::fmt,
};

/// Length of the raw digest.
pub const DIGEST_LEN: usize = 32;

/// Length of the marshaled form (length prefix + digest).
pub const MARSHALLED_LEN: usize = 33;

/// A SHA-256 digest with the ledger's 33-byte wire form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash {
    bytes: [u8; DIGEST_LEN],
}

impl Hash {
    /// The all-zero hash used for unset header fields.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Hash arbitrary bytes with SHA-256.
    pub fn sha(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&digest);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.bytes
    }

    /// Append the 33-byte marshaled form to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(DIGEST_LEN as u8);
        buf.extend_from_slice(&self.bytes);
    }

    /// Decode a hash from the front of `data`, returning the remainder.
    pub fn read_from(data: &[u8]) -> Result<(Self, &[u8])> {
        if data.len() < MARSHALLED_LEN {
            return Err(LedgerError::UnexpectedEnd {
                need: MARSHALLED_LEN,
                have: data.len(),
            });
        }
        if data[0] != DIGEST_LEN as u8 {
            return Err(LedgerError::BadHashPrefix(data[0]));
        }
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&data[1..MARSHALLED_LEN]);
        Ok((Self { bytes }, &data[MARSHALLED_LEN..]))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.bytes))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.bytes))
    }
}

// JSON/XML shape: { "bytes": "<base64 digest>" }.

#[derive(Serialize, Deserialize)]
struct HashRepr {
    bytes: String,
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        HashRepr { bytes: BASE64.encode(self.bytes) }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let repr = HashRepr::deserialize(deserializer)?;
        let decoded = BASE64.decode(repr.bytes.as_bytes()).map_err(de::Error::custom)?;
        let bytes: [u8; DIGEST_LEN] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| de::Error::custom(format!("hash must be {DIGEST_LEN} bytes")))?;
        Ok(Self { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha_is_deterministic() {
        assert_eq!(Hash::sha(b"abc"), Hash::sha(b"abc"));
        assert_ne!(Hash::sha(b"abc"), Hash::sha(b"abd"));
    }

    #[test]
    fn test_marshal_roundtrip() {
        let h = Hash::sha(b"roundtrip");
        let mut buf = Vec::new();
        h.write_to(&mut buf);
        assert_eq!(buf.len(), MARSHALLED_LEN);
        assert_eq!(buf[0], DIGEST_LEN as u8);
        let (decoded, rest) = Hash::read_from(&buf).unwrap();
        assert_eq!(decoded, h);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_bad_prefix_rejected() {
        let mut buf = Vec::new();
        Hash::sha(b"x").write_to(&mut buf);
        buf[0] = 31;
        assert!(matches!(Hash::read_from(&buf), Err(LedgerError::BadHashPrefix(31))));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let err = Hash::read_from(&[32u8; 10]).unwrap_err();
        assert!(matches!(err, LedgerError::UnexpectedEnd { .. }));
    }

    #[test]
    fn test_json_shape() {
        let h = Hash::from_bytes([0u8; 32]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, r#"{"bytes":"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="}"#);
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
