//! Keys stored in tables.
//!
//! A user key is stored together with the log sequence number (LSN) of the
//! write that produced it:
//!
//! ```text
//! +--------------------------------------------------------+
//! | escaped user key | 0x00 0x00 | !lsn (u64 big-endian)   |
//! +--------------------------------------------------------+
//! ```
//!
//! Escaping turns every `0x00` of the user key into `0x00 0xFF`, so the
//! `0x00 0x00` terminator sorts before any continuation of the user key.
//! Plain byte order of stored keys is therefore user key ascending, then LSN
//! descending: the newest version of a key is met first when scanning forward.

use crate::error::LsmError;
use crate::sstable::KEY_SUFFIX_SIZE;
use crate::Result;

/// Raw user key
pub type UserKey = Vec<u8>;

pub type LSN = u64;

pub const MAX_LSN: LSN = u64::MAX;

const ESCAPE: u8 = 0xFF;
const TERMINATOR: [u8; 2] = [0x00, 0x00];

fn escape_into(user_key: &[u8], out: &mut Vec<u8>) {
    for &b in user_key {
        out.push(b);
        if b == 0x00 {
            out.push(ESCAPE);
        }
    }
    out.extend_from_slice(&TERMINATOR);
}

/// Escaped user key followed by the terminator. Shared by every stored
/// version of `user_key`, and by no other key.
pub fn key_prefix(user_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(user_key.len() + TERMINATOR.len() + KEY_SUFFIX_SIZE);
    escape_into(user_key, &mut out);
    out
}

/// Length of every stored key of `user_key`.
pub fn encoded_len(user_key: &[u8]) -> usize {
    let zeros = user_key.iter().filter(|&&b| b == 0x00).count();
    user_key.len() + zeros + TERMINATOR.len() + KEY_SUFFIX_SIZE
}

pub fn encode_index_key(user_key: &[u8], lsn: LSN) -> Vec<u8> {
    let mut out = key_prefix(user_key);
    out.extend_from_slice(&(!lsn).to_be_bytes());
    out
}

pub fn decode_index_key(key: &[u8]) -> Result<(UserKey, LSN)> {
    let mut user_key = Vec::with_capacity(key.len());
    let mut i = 0;
    while i < key.len() {
        let b = key[i];
        if b != 0x00 {
            user_key.push(b);
            i += 1;
            continue;
        }
        match key.get(i + 1) {
            Some(&ESCAPE) => {
                user_key.push(0x00);
                i += 2;
            }
            Some(0x00) => {
                let suffix = &key[i + 2..];
                if suffix.len() != KEY_SUFFIX_SIZE {
                    break;
                }
                let mut lsn = [0u8; KEY_SUFFIX_SIZE];
                lsn.copy_from_slice(suffix);
                return Ok((user_key, !u64::from_be_bytes(lsn)));
            }
            _ => break,
        }
    }
    Err(LsmError::corrupted("malformed index key"))
}

/// Bounds covering every stored version of one user key.
pub struct LookupKey {
    prefix: Vec<u8>,
    start: Vec<u8>,
    end: Vec<u8>,
}

impl LookupKey {
    pub fn new(user_key: &[u8]) -> LookupKey {
        let prefix = key_prefix(user_key);
        let mut start = prefix.clone();
        start.extend_from_slice(&(!MAX_LSN).to_be_bytes());
        let mut end = prefix.clone();
        end.extend_from_slice(&(!0u64).to_be_bytes());
        LookupKey { prefix, start, end }
    }

    /// Stored key part shared by all versions; what the bloom filters index.
    #[inline]
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Smallest stored key of the user key: its newest possible version.
    #[inline]
    pub fn start(&self) -> &[u8] {
        &self.start
    }

    /// Largest stored key of the user key: its oldest possible version.
    #[inline]
    pub fn end(&self) -> &[u8] {
        &self.end
    }
}

#[cfg(test)]
mod tests {
    use crate::db::key_types::{
        decode_index_key, encode_index_key, encoded_len, LookupKey, MAX_LSN,
    };
    use crate::sstable::filter_key;

    #[test]
    fn test_order_follows_user_key() {
        let keys: [&[u8]; 9] = [b"", b"\0", b"\0\0", b"\0a", b"a", b"a\0", b"a\0\0", b"ab", b"b"];
        for pair in keys.windows(2) {
            for lsn in [0, 1, 1000, MAX_LSN] {
                for other in [0, 7, MAX_LSN] {
                    assert!(
                        encode_index_key(pair[0], lsn) < encode_index_key(pair[1], other),
                        "{:?} < {:?}",
                        pair[0],
                        pair[1]
                    );
                }
            }
        }
    }

    #[test]
    fn test_newest_version_first() {
        let old = encode_index_key(b"key", 1);
        let new = encode_index_key(b"key", 2);
        assert!(new < old);

        let lookup = LookupKey::new(b"key");
        assert!(lookup.start() <= new.as_slice());
        assert!(old.as_slice() <= lookup.end());
        assert!(encode_index_key(b"ke", 0).as_slice() < lookup.start());
        assert!(encode_index_key(b"key\0", MAX_LSN).as_slice() > lookup.end());
        assert_eq!(filter_key(&new), lookup.prefix());
        assert_eq!(filter_key(&old), lookup.prefix());
    }

    #[test]
    fn test_decode() {
        for key in [&b""[..], b"plain", b"\0", b"a\0b\0\0", b"\xff\0\xff"] {
            for lsn in [0, 42, MAX_LSN] {
                let encoded = encode_index_key(key, lsn);
                assert_eq!(encoded.len(), encoded_len(key));
                let (user_key, decoded) = decode_index_key(&encoded).unwrap();
                assert_eq!(user_key, key);
                assert_eq!(decoded, lsn);
            }
        }
        assert!(decode_index_key(b"no terminator").is_err());
        assert!(decode_index_key(b"short\0\0\x01\x02").is_err());
        assert!(decode_index_key(b"bad\0\x01escape\0\0\0\0\0\0\0\0\0\0").is_err());
    }
}
