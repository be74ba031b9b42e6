//! Directory-block header codec.
//!
//! The on-disk layout is fixed and big-endian throughout:
//!
//! ```text
//! chainID(33) || bodyHash(33) || prevKeyMR(33) || prevHash(33) ||
//! dbHeight(u32) || segmentsMR(33) || balanceMR(33) || bodySize(u64)
//! ```

use crate::{
    error::{LedgerError, Result},
    hash::{Hash, MARSHALLED_LEN},
};

/// Header of a sealed directory block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirBlockHeader {
    /// Chain this block extends.
    pub chain_id: Hash,
    /// Hash over the concatenated marshaled body entries.
    pub body_hash: Hash,
    /// Key merkle root of the previous block.
    pub prev_key_mr: Hash,
    /// Full hash of the previous block.
    pub prev_hash: Hash,
    /// Height of this block in the directory chain.
    pub db_height: u32,
    /// Merkle root over the block's segments.
    pub segments_mr: Hash,
    /// Merkle root over the balance set.
    pub balance_mr: Hash,
    /// Size in bytes of the marshaled body.
    pub body_size: u64,
}

impl DirBlockHeader {
    /// Size of the marshaled header: six hashes, a u32 and a u64.
    pub const fn marshalled_size() -> usize {
        6 * MARSHALLED_LEN + 4 + 8
    }

    pub fn marshal_binary(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::marshalled_size());
        self.chain_id.write_to(&mut buf);
        self.body_hash.write_to(&mut buf);
        self.prev_key_mr.write_to(&mut buf);
        self.prev_hash.write_to(&mut buf);
        buf.extend_from_slice(&self.db_height.to_be_bytes());
        self.segments_mr.write_to(&mut buf);
        self.balance_mr.write_to(&mut buf);
        buf.extend_from_slice(&self.body_size.to_be_bytes());
        buf
    }

    pub fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        if data.len() < Self::marshalled_size() {
            return Err(LedgerError::UnexpectedEnd {
                need: Self::marshalled_size(),
                have: data.len(),
            });
        }
        let (chain_id, data) = Hash::read_from(data)?;
        let (body_hash, data) = Hash::read_from(data)?;
        let (prev_key_mr, data) = Hash::read_from(data)?;
        let (prev_hash, data) = Hash::read_from(data)?;
        let db_height = u32::from_be_bytes(data[..4].try_into().unwrap());
        let data = &data[4..];
        let (segments_mr, data) = Hash::read_from(data)?;
        let (balance_mr, data) = Hash::read_from(data)?;
        let body_size = u64::from_be_bytes(data[..8].try_into().unwrap());
        Ok(Self {
            chain_id,
            body_hash,
            prev_key_mr,
            prev_hash,
            db_height,
            segments_mr,
            balance_mr,
            body_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> DirBlockHeader {
        DirBlockHeader {
            chain_id: Hash::sha(b"chain"),
            body_hash: Hash::sha(b"body"),
            prev_key_mr: Hash::sha(b"prev-key-mr"),
            prev_hash: Hash::sha(b"prev"),
            db_height: 42,
            segments_mr: Hash::sha(b"segments"),
            balance_mr: Hash::sha(b"balances"),
            body_size: 9_001,
        }
    }

    #[test]
    fn test_roundtrip() {
        let header = sample_header();
        let bytes = header.marshal_binary();
        assert_eq!(bytes.len(), DirBlockHeader::marshalled_size());
        let decoded = DirBlockHeader::unmarshal_binary(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_height_is_big_endian() {
        let header = sample_header();
        let bytes = header.marshal_binary();
        // dbHeight sits right after the four leading hashes.
        let off = 4 * 33;
        assert_eq!(&bytes[off..off + 4], &42u32.to_be_bytes());
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = sample_header().marshal_binary();
        let err = DirBlockHeader::unmarshal_binary(&bytes[..100]).unwrap_err();
        assert!(matches!(err, LedgerError::UnexpectedEnd { .. }));
    }
}
