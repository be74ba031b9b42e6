//! Credit-block body entries.
//!
//! The three payment entry kinds share a common marshaled prefix
//! (`type(u8) || publicKey(33) || credits(i32)`) and are dispatched on the
//! leading type byte. Rather than a trait object per kind, the whole set
//! is one tagged variant.

use crate::{
    error::{LedgerError, Result},
    hash::Hash,
};

/// Type byte: federate server index marker.
pub const TYPE_SERVER_INDEX: u8 = 0;
/// Type byte: minute number marker.
pub const TYPE_MINUTE_NUMBER: u8 = 1;
/// Type byte: chain payment.
pub const TYPE_PAY_CHAIN: u8 = 2;
/// Type byte: entry payment.
pub const TYPE_PAY_ENTRY: u8 = 3;
/// Type byte: credit purchase.
pub const TYPE_BUY: u8 = 4;

/// A single entry in a credit block body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditEntry {
    /// Credits bought with a factoid transaction.
    Buy {
        public_key: Hash,
        credits: i32,
        /// Hash of the funding factoid transaction.
        tx_hash: Hash,
    },
    /// Credits spent committing an entry.
    PayEntry {
        public_key: Hash,
        credits: i32,
        entry_hash: Hash,
        timestamp: i64,
        sig: Vec<u8>,
    },
    /// Credits spent committing a new chain.
    PayChain {
        public_key: Hash,
        credits: i32,
        entry_hash: Hash,
        chain_id_hash: Hash,
        /// Hash over `entryHash || chainIDHash`.
        entry_chain_id_hash: Hash,
        sig: Vec<u8>,
    },
}

impl CreditEntry {
    pub fn entry_type(&self) -> u8 {
        match self {
            Self::Buy { .. } => TYPE_BUY,
            Self::PayEntry { .. } => TYPE_PAY_ENTRY,
            Self::PayChain { .. } => TYPE_PAY_CHAIN,
        }
    }

    pub fn public_key(&self) -> &Hash {
        match self {
            Self::Buy { public_key, .. }
            | Self::PayEntry { public_key, .. }
            | Self::PayChain { public_key, .. } => public_key,
        }
    }

    pub fn credits(&self) -> i32 {
        match self {
            Self::Buy { credits, .. }
            | Self::PayEntry { credits, .. }
            | Self::PayChain { credits, .. } => *credits,
        }
    }

    pub fn marshalled_size(&self) -> usize {
        // Shared prefix: type byte, 33-byte key, i32 credits.
        let prefix = 1 + 33 + 4;
        match self {
            Self::Buy { .. } => prefix + 33,
            Self::PayEntry { sig, .. } => prefix + 33 + 8 + 4 + sig.len(),
            Self::PayChain { sig, .. } => prefix + 33 * 3 + 4 + sig.len(),
        }
    }

    pub fn marshal_binary(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.marshalled_size());
        buf.push(self.entry_type());
        self.public_key().write_to(&mut buf);
        buf.extend_from_slice(&self.credits().to_be_bytes());
        match self {
            Self::Buy { tx_hash, .. } => {
                tx_hash.write_to(&mut buf);
            }
            Self::PayEntry { entry_hash, timestamp, sig, .. } => {
                entry_hash.write_to(&mut buf);
                buf.extend_from_slice(&timestamp.to_be_bytes());
                buf.extend_from_slice(&(sig.len() as u32).to_be_bytes());
                buf.extend_from_slice(sig);
            }
            Self::PayChain { entry_hash, chain_id_hash, entry_chain_id_hash, sig, .. } => {
                entry_hash.write_to(&mut buf);
                chain_id_hash.write_to(&mut buf);
                entry_chain_id_hash.write_to(&mut buf);
                buf.extend_from_slice(&(sig.len() as u32).to_be_bytes());
                buf.extend_from_slice(sig);
            }
        }
        buf
    }

    /// Decode one entry from the front of `data`, returning the remainder.
    pub fn unmarshal_binary(data: &[u8]) -> Result<(Self, &[u8])> {
        let kind = *data.first().ok_or(LedgerError::UnexpectedEnd { need: 1, have: 0 })?;
        let (public_key, rest) = Hash::read_from(&data[1..])?;
        let credits = read_i32(rest)?;
        let rest = &rest[4..];

        match kind {
            TYPE_BUY => {
                let (tx_hash, rest) = Hash::read_from(rest)?;
                Ok((Self::Buy { public_key, credits, tx_hash }, rest))
            }
            TYPE_PAY_ENTRY => {
                let (entry_hash, rest) = Hash::read_from(rest)?;
                let timestamp = read_i64(rest)?;
                let (sig, rest) = read_sig(&rest[8..])?;
                Ok((Self::PayEntry { public_key, credits, entry_hash, timestamp, sig }, rest))
            }
            TYPE_PAY_CHAIN => {
                let (entry_hash, rest) = Hash::read_from(rest)?;
                let (chain_id_hash, rest) = Hash::read_from(rest)?;
                let (entry_chain_id_hash, rest) = Hash::read_from(rest)?;
                let (sig, rest) = read_sig(rest)?;
                Ok((
                    Self::PayChain {
                        public_key,
                        credits,
                        entry_hash,
                        chain_id_hash,
                        entry_chain_id_hash,
                        sig,
                    },
                    rest,
                ))
            }
            other => Err(LedgerError::UnknownEntryType(other)),
        }
    }
}

/// Pointers tying a credit block into the factoid chain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CbInfo {
    pub cb_hash: Hash,
    pub fb_hash: Hash,
    pub fb_block_num: u64,
    pub chain_id: Hash,
}

impl CbInfo {
    pub const fn marshalled_size() -> usize {
        33 + 33 + 8 + 33
    }

    pub fn marshal_binary(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::marshalled_size());
        self.cb_hash.write_to(&mut buf);
        self.fb_hash.write_to(&mut buf);
        buf.extend_from_slice(&self.fb_block_num.to_be_bytes());
        self.chain_id.write_to(&mut buf);
        buf
    }

    pub fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        if data.len() < Self::marshalled_size() {
            return Err(LedgerError::UnexpectedEnd {
                need: Self::marshalled_size(),
                have: data.len(),
            });
        }
        let (cb_hash, data) = Hash::read_from(data)?;
        let (fb_hash, data) = Hash::read_from(data)?;
        let fb_block_num = u64::from_be_bytes(data[..8].try_into().unwrap());
        let (chain_id, _) = Hash::read_from(&data[8..])?;
        Ok(Self { cb_hash, fb_hash, fb_block_num, chain_id })
    }
}

/// A public key's current credit balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcBalance {
    pub public_key: Hash,
    pub credits: i32,
}

fn read_i32(data: &[u8]) -> Result<i32> {
    let bytes: [u8; 4] = data
        .get(..4)
        .ok_or(LedgerError::UnexpectedEnd { need: 4, have: data.len() })?
        .try_into()
        .unwrap();
    Ok(i32::from_be_bytes(bytes))
}

fn read_i64(data: &[u8]) -> Result<i64> {
    let bytes: [u8; 8] = data
        .get(..8)
        .ok_or(LedgerError::UnexpectedEnd { need: 8, have: data.len() })?
        .try_into()
        .unwrap();
    Ok(i64::from_be_bytes(bytes))
}

fn read_sig(data: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let len = read_i32(data)? as usize;
    let data = &data[4..];
    if data.len() < len {
        return Err(LedgerError::UnexpectedEnd { need: len, have: data.len() });
    }
    Ok((data[..len].to_vec(), &data[len..]))
}
