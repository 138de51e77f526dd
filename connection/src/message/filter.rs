//! Bloom filter control payloads sent by light clients.

use crate::codec::{read_var_bytes, write_var_bytes};
use bitcoin::consensus::encode::{self, Decodable, Encodable};
use bitcoin::io::{self, Read, Write};

/// Maximum size of a loaded filter in bytes.
pub const MAX_FILTER_SIZE: usize = 36_000;
/// Maximum number of hash functions.
pub const MAX_HASH_FUNCTIONS: u8 = 50;
/// Maximum size of an element added to a loaded filter.
pub const MAX_FILTER_ADD_SIZE: usize = 520;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterLoadPayload {
    pub filter: Vec<u8>,
    pub k: u8,
    pub tweak: u32,
}

impl Encodable for FilterLoadPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = write_var_bytes(writer, &self.filter)?;
        len += self.k.consensus_encode(writer)?;
        len += self.tweak.consensus_encode(writer)?;
        Ok(len)
    }
}

impl Decodable for FilterLoadPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        let filter = read_var_bytes(reader, MAX_FILTER_SIZE)?;
        let k = u8::consensus_decode(reader)?;
        if k > MAX_HASH_FUNCTIONS {
            return Err(encode::Error::ParseFailed("too many bloom filter hash functions"));
        }
        Ok(FilterLoadPayload {
            filter,
            k,
            tweak: u32::consensus_decode(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterAddPayload {
    pub data: Vec<u8>,
}

impl Encodable for FilterAddPayload {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        write_var_bytes(writer, &self.data)
    }
}

impl Decodable for FilterAddPayload {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, encode::Error> {
        Ok(FilterAddPayload {
            data: read_var_bytes(reader, MAX_FILTER_ADD_SIZE)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_load_limits() {
        let payload = FilterLoadPayload {
            filter: vec![0u8; 8],
            k: MAX_HASH_FUNCTIONS + 1,
            tweak: 0,
        };
        let result: Result<FilterLoadPayload, _> = encode::deserialize(&encode::serialize(&payload));
        assert!(result.is_err());

        let payload = FilterLoadPayload {
            filter: vec![0u8; MAX_FILTER_SIZE + 1],
            k: 1,
            tweak: 0,
        };
        let result: Result<FilterLoadPayload, _> = encode::deserialize(&encode::serialize(&payload));
        assert!(result.is_err());
    }

    #[test]
    fn test_filter_add_limit() {
        let payload = FilterAddPayload {
            data: vec![1u8; MAX_FILTER_ADD_SIZE],
        };
        let decoded: FilterAddPayload = encode::deserialize(&encode::serialize(&payload)).unwrap();
        assert_eq!(decoded, payload);

        let payload = FilterAddPayload {
            data: vec![1u8; MAX_FILTER_ADD_SIZE + 1],
        };
        let result: Result<FilterAddPayload, _> = encode::deserialize(&encode::serialize(&payload));
        assert!(result.is_err());
    }
}
