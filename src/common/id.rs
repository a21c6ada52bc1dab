//! Node Id, infohash or a lookup target.
use rand::Rng;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
/// The maximum depth of a bucket in the routing table, one level per bit of an [Id].
pub const MAX_BUCKET_DEPTH: usize = ID_SIZE * 8;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A 160 bit identifier, ordered as an unsigned big-endian integer.
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    /// The smallest possible [Id], all zeros.
    pub const MIN: Id = Id([0; ID_SIZE]);
    /// The largest possible [Id], all ones.
    pub const MAX: Id = Id([0xff; ID_SIZE]);

    /// Generate a random [Id], the sha1 hash of 20 random bytes.
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let seed: [u8; ID_SIZE] = rng.gen();

        Id(sha1_smol::Sha1::from(seed).digest().bytes())
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id, DecodeIdError> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(DecodeIdError::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp[..ID_SIZE].clone_from_slice(&bytes[..ID_SIZE]);

        Ok(Id(tmp))
    }

    /// Truncate a wider big-endian buffer, as returned by [crate::common::arith],
    /// to its lowest [ID_SIZE] bytes. Shorter buffers are zero-extended on the left.
    pub(crate) fn from_wide(bytes: &[u8]) -> Id {
        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];

        if bytes.len() >= ID_SIZE {
            tmp.clone_from_slice(&bytes[bytes.len() - ID_SIZE..]);
        } else {
            tmp[ID_SIZE - bytes.len()..].clone_from_slice(bytes);
        }

        Id(tmp)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Id {
        Id(bytes)
    }
}

impl FromStr for Id {
    type Err = DecodeIdError;

    fn from_str(s: &str) -> Result<Id, DecodeIdError> {
        if s.len() != ID_SIZE * 2 {
            return Err(DecodeIdError::InvalidIdSize(s.len() / 2));
        }

        let mut bytes = [0_u8; ID_SIZE];

        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = s
                .get(i * 2..i * 2 + 2)
                .ok_or(DecodeIdError::InvalidHexEncoding)?;

            *byte = u8::from_str_radix(pair, 16).map_err(|_| DecodeIdError::InvalidHexEncoding)?;
        }

        Ok(Id(bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
/// Errors decoding an [Id] from bytes or a hex string.
pub enum DecodeIdError {
    /// Id is expected to by 20 bytes.
    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    /// Id string is not valid hex.
    #[error("Invalid hex encoded Id")]
    InvalidHexEncoding,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = Id::random();

        let parsed = Id::from_str(&id.to_string()).unwrap();

        assert_eq!(parsed, id);
    }

    #[test]
    fn from_str() {
        let id = Id::from_str("3444b337cc50b002736f0ba1e1af1c0e430474e2").unwrap();

        assert_eq!(id.0[0], 0x34);
        assert_eq!(id.0[19], 0xe2);
        assert_eq!(
            Id::from_str("3444b337"),
            Err(DecodeIdError::InvalidIdSize(4))
        );
        assert_eq!(
            Id::from_str("zz44b337cc50b002736f0ba1e1af1c0e430474e2"),
            Err(DecodeIdError::InvalidHexEncoding)
        );
    }

    #[test]
    fn invalid_id_size() {
        assert_eq!(
            Id::from_bytes([0_u8; 21]),
            Err(DecodeIdError::InvalidIdSize(21))
        );
    }

    #[test]
    fn ordering_is_big_endian() {
        let mut low = [0_u8; ID_SIZE];
        low[19] = 0xff;
        let mut high = [0_u8; ID_SIZE];
        high[0] = 0x01;

        assert!(Id(low) < Id(high));
        assert!(Id::MIN < Id(low));
        assert!(Id(high) < Id::MAX);
    }

    #[test]
    fn from_wide() {
        let mut wide = vec![0, 1];
        wide.extend_from_slice(&[0xab; ID_SIZE]);

        assert_eq!(Id::from_wide(&wide), Id([0xab; ID_SIZE]));
        assert_eq!(Id::from_wide(&[1]).0[19], 1);
    }
}
