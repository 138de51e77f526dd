//! Encoding helpers shared by the wire payloads.
//!
//! Neo frames variable length fields the same way bitcoin does, a
//! CompactSize prefix followed by the items, so the primitives come from
//! [`bitcoin::consensus`]. The helpers here add the per-field size caps the
//! neo protocol puts on those fields.

use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};
use bitcoin::hashes::{hash160, sha256d, Hash};
use bitcoin::io::{self, Read, Write};

/// 256-bit content hash identifying blocks, transactions and consensus items.
pub type Hash256 = sha256d::Hash;

/// 160-bit script hash.
pub type Hash160 = hash160::Hash;

/// Encoded size of a CompactSize length prefix.
pub(crate) fn var_int_size(n: u64) -> usize {
    match n {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

pub(crate) fn write_var_bytes<W: Write + ?Sized>(
    writer: &mut W,
    bytes: &[u8],
) -> Result<usize, io::Error> {
    let len = VarInt(bytes.len() as u64).consensus_encode(writer)?;
    writer.write_all(bytes)?;
    Ok(len + bytes.len())
}

pub(crate) fn read_var_bytes<R: Read + ?Sized>(
    reader: &mut R,
    max: usize,
) -> Result<Vec<u8>, encode::Error> {
    let len = VarInt::consensus_decode(reader)?.0;
    if len > max as u64 {
        return Err(encode::Error::OversizedVectorAllocation {
            requested: len as usize,
            max,
        });
    }
    let mut buffer = vec![0u8; len as usize];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

pub(crate) fn write_var_string<W: Write + ?Sized>(
    writer: &mut W,
    value: &str,
) -> Result<usize, io::Error> {
    write_var_bytes(writer, value.as_bytes())
}

pub(crate) fn read_var_string<R: Read + ?Sized>(
    reader: &mut R,
    max: usize,
) -> Result<String, encode::Error> {
    let bytes = read_var_bytes(reader, max)?;
    String::from_utf8(bytes).map_err(|_| encode::Error::ParseFailed("string is not valid utf-8"))
}

pub(crate) fn write_hash<W: Write + ?Sized>(
    writer: &mut W,
    hash: &Hash256,
) -> Result<usize, io::Error> {
    writer.write_all(hash.as_byte_array())?;
    Ok(32)
}

pub(crate) fn read_hash<R: Read + ?Sized>(reader: &mut R) -> Result<Hash256, encode::Error> {
    let mut bytes = [0u8; 32];
    reader.read_exact(&mut bytes)?;
    Ok(Hash256::from_byte_array(bytes))
}

pub(crate) fn write_hash160<W: Write + ?Sized>(
    writer: &mut W,
    hash: &Hash160,
) -> Result<usize, io::Error> {
    writer.write_all(hash.as_byte_array())?;
    Ok(20)
}

pub(crate) fn read_hash160<R: Read + ?Sized>(reader: &mut R) -> Result<Hash160, encode::Error> {
    let mut bytes = [0u8; 20];
    reader.read_exact(&mut bytes)?;
    Ok(Hash160::from_byte_array(bytes))
}

/// Write a length prefixed list of items.
pub(crate) fn write_list<W, T>(writer: &mut W, items: &[T]) -> Result<usize, io::Error>
where
    W: Write + ?Sized,
    T: Encodable,
{
    let mut len = VarInt(items.len() as u64).consensus_encode(writer)?;
    for item in items {
        len += item.consensus_encode(writer)?;
    }
    Ok(len)
}

/// Read a length prefixed list of at most `max` items.
pub(crate) fn read_list<R, T>(reader: &mut R, max: usize) -> Result<Vec<T>, encode::Error>
where
    R: Read + ?Sized,
    T: Decodable,
{
    let count = VarInt::consensus_decode(reader)?.0;
    if count > max as u64 {
        return Err(encode::Error::OversizedVectorAllocation {
            requested: count as usize,
            max,
        });
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(T::consensus_decode(reader)?);
    }
    Ok(items)
}

pub(crate) fn write_hash_list<W: Write + ?Sized>(
    writer: &mut W,
    hashes: &[Hash256],
) -> Result<usize, io::Error> {
    let mut len = VarInt(hashes.len() as u64).consensus_encode(writer)?;
    for hash in hashes {
        len += write_hash(writer, hash)?;
    }
    Ok(len)
}

pub(crate) fn read_hash_list<R: Read + ?Sized>(
    reader: &mut R,
    max: usize,
) -> Result<Vec<Hash256>, encode::Error> {
    let count = VarInt::consensus_decode(reader)?.0;
    if count > max as u64 {
        return Err(encode::Error::OversizedVectorAllocation {
            requested: count as usize,
            max,
        });
    }
    let mut hashes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        hashes.push(read_hash(reader)?);
    }
    Ok(hashes)
}
