//! Binary encoding of `sf.acme.type.v1.Block`, protobuf compatible.
//!
//! Only varint and length-delimited wire types are produced. Scalars holding
//! their default value are left out, except the parent pointer which has
//! explicit presence.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{TimeZone, Utc};
use dummy_chain_common::types::{
    u256_to_be_bytes, Attribute, Block, BlockHeader, BlockRef, Event, Transaction,
    TransactionType,
};
use primitive_types::U256;
use thiserror::Error;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Largest integer the `BigInt` message may carry
const MAX_BIG_INT_BYTES: usize = 32;

/// Errors raised while decoding a block payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Payload ended in the middle of a field")]
    Truncated,

    #[error("Varint longer than 10 bytes")]
    VarintOverflow,

    #[error("Unsupported wire type {0}")]
    UnsupportedWireType(u8),

    #[error("Field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("Unknown transaction type {0:?}")]
    UnknownTransactionType(String),

    #[error("Big integer of {0} bytes does not fit in 256 bits")]
    BigIntOverflow(usize),

    #[error("Block has no header")]
    MissingHeader,
}

/// Encodes a block into its binary payload
pub fn encode_block(block: &Block) -> Bytes {
    let mut buf = BytesMut::with_capacity(block.approximated_size() + 64);

    put_message(&mut buf, 1, &encode_header(&block.header));
    for trx in &block.transactions {
        put_message(&mut buf, 2, &encode_transaction(trx));
    }

    buf.freeze()
}

fn encode_header(header: &BlockHeader) -> BytesMut {
    let mut buf = BytesMut::new();

    put_uint(&mut buf, 1, header.height);
    put_str(&mut buf, 2, &header.hash);
    if let Some(parent) = &header.parent {
        put_key(&mut buf, 3, WIRE_VARINT);
        put_varint(&mut buf, parent.num);
        put_key(&mut buf, 4, WIRE_LEN);
        put_len_prefixed(&mut buf, parent.hash.as_bytes());
    }
    put_uint(&mut buf, 5, header.finality.num);
    put_str(&mut buf, 6, &header.finality.hash);
    // int64 goes on the wire as its two's complement
    put_uint(&mut buf, 7, header.timestamp_nanos() as u64);

    buf
}

fn encode_transaction(trx: &Transaction) -> BytesMut {
    let mut buf = BytesMut::new();

    put_str(&mut buf, 1, trx.kind.as_str());
    put_str(&mut buf, 2, &trx.hash);
    put_str(&mut buf, 3, &trx.sender);
    put_str(&mut buf, 4, &trx.receiver);
    put_message(&mut buf, 5, &encode_big_int(&trx.amount));
    put_message(&mut buf, 6, &encode_big_int(&trx.fee));
    put_uint(&mut buf, 7, trx.success as u64);
    for event in &trx.events {
        put_message(&mut buf, 8, &encode_event(event));
    }
    put_bytes(&mut buf, 9, &trx.data);

    buf
}

fn encode_big_int(value: &U256) -> BytesMut {
    let mut buf = BytesMut::new();
    put_bytes(&mut buf, 1, &u256_to_be_bytes(value));
    buf
}

fn encode_event(event: &Event) -> BytesMut {
    let mut buf = BytesMut::new();

    put_str(&mut buf, 1, &event.kind);
    for attribute in &event.attributes {
        let mut inner = BytesMut::new();
        put_str(&mut inner, 1, &attribute.key);
        put_str(&mut inner, 2, &attribute.value);
        put_message(&mut buf, 2, &inner);
    }

    buf
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn put_key(buf: &mut BytesMut, field: u32, wire_type: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

fn put_len_prefixed(buf: &mut BytesMut, data: &[u8]) {
    put_varint(buf, data.len() as u64);
    buf.put_slice(data);
}

fn put_uint(buf: &mut BytesMut, field: u32, value: u64) {
    if value != 0 {
        put_key(buf, field, WIRE_VARINT);
        put_varint(buf, value);
    }
}

fn put_bytes(buf: &mut BytesMut, field: u32, data: &[u8]) {
    if !data.is_empty() {
        put_key(buf, field, WIRE_LEN);
        put_len_prefixed(buf, data);
    }
}

fn put_str(buf: &mut BytesMut, field: u32, value: &str) {
    put_bytes(buf, field, value.as_bytes());
}

/// Sub-messages are always written, even when empty
fn put_message(buf: &mut BytesMut, field: u32, message: &[u8]) {
    put_key(buf, field, WIRE_LEN);
    put_len_prefixed(buf, message);
}

/// Decodes a binary payload back into a block, skipping unknown fields
pub fn decode_block(mut buf: &[u8]) -> Result<Block, WireError> {
    let mut header = None;
    let mut transactions = Vec::new();

    while buf.has_remaining() {
        match get_key(&mut buf)? {
            (1, WIRE_LEN) => header = Some(decode_header(get_len_delimited(&mut buf)?)?),
            (2, WIRE_LEN) => transactions.push(decode_transaction(get_len_delimited(&mut buf)?)?),
            (_, wire_type) => skip_field(&mut buf, wire_type)?,
        }
    }

    Ok(Block {
        header: header.ok_or(WireError::MissingHeader)?,
        transactions,
    })
}

fn decode_header(mut buf: &[u8]) -> Result<BlockHeader, WireError> {
    let mut height = 0;
    let mut hash = String::new();
    let mut previous_num = None;
    let mut previous_hash = None;
    let mut final_num = 0;
    let mut final_hash = String::new();
    let mut timestamp = 0i64;

    while buf.has_remaining() {
        match get_key(&mut buf)? {
            (1, WIRE_VARINT) => height = get_varint(&mut buf)?,
            (2, WIRE_LEN) => hash = get_string(&mut buf, "hash")?,
            (3, WIRE_VARINT) => previous_num = Some(get_varint(&mut buf)?),
            (4, WIRE_LEN) => previous_hash = Some(get_string(&mut buf, "previous_hash")?),
            (5, WIRE_VARINT) => final_num = get_varint(&mut buf)?,
            (6, WIRE_LEN) => final_hash = get_string(&mut buf, "final_hash")?,
            (7, WIRE_VARINT) => timestamp = get_varint(&mut buf)? as i64,
            (_, wire_type) => skip_field(&mut buf, wire_type)?,
        }
    }

    let parent = match (previous_num, previous_hash) {
        (None, None) => None,
        (num, hash) => Some(BlockRef::new(num.unwrap_or(0), hash.unwrap_or_default())),
    };

    Ok(BlockHeader {
        height,
        hash,
        parent,
        finality: BlockRef::new(final_num, final_hash),
        timestamp: Utc.timestamp_nanos(timestamp),
    })
}

fn decode_transaction(mut buf: &[u8]) -> Result<Transaction, WireError> {
    let mut kind = None;
    let mut trx = Transaction {
        kind: TransactionType::Transfer,
        hash: String::new(),
        sender: String::new(),
        receiver: String::new(),
        data: Vec::new(),
        amount: U256::zero(),
        fee: U256::zero(),
        success: false,
        events: Vec::new(),
    };

    while buf.has_remaining() {
        match get_key(&mut buf)? {
            (1, WIRE_LEN) => kind = Some(get_string(&mut buf, "type")?),
            (2, WIRE_LEN) => trx.hash = get_string(&mut buf, "hash")?,
            (3, WIRE_LEN) => trx.sender = get_string(&mut buf, "sender")?,
            (4, WIRE_LEN) => trx.receiver = get_string(&mut buf, "receiver")?,
            (5, WIRE_LEN) => trx.amount = decode_big_int(get_len_delimited(&mut buf)?)?,
            (6, WIRE_LEN) => trx.fee = decode_big_int(get_len_delimited(&mut buf)?)?,
            (7, WIRE_VARINT) => trx.success = get_varint(&mut buf)? != 0,
            (8, WIRE_LEN) => trx.events.push(decode_event(get_len_delimited(&mut buf)?)?),
            (9, WIRE_LEN) => trx.data = get_len_delimited(&mut buf)?.to_vec(),
            (_, wire_type) => skip_field(&mut buf, wire_type)?,
        }
    }

    // proto3 default of the type string is empty, which maps to no known type
    let kind = kind.unwrap_or_default();
    trx.kind = kind
        .parse()
        .map_err(|_| WireError::UnknownTransactionType(kind))?;

    Ok(trx)
}

fn decode_big_int(mut buf: &[u8]) -> Result<U256, WireError> {
    let mut value = U256::zero();

    while buf.has_remaining() {
        match get_key(&mut buf)? {
            (1, WIRE_LEN) => {
                let bytes = get_len_delimited(&mut buf)?;
                if bytes.len() > MAX_BIG_INT_BYTES {
                    return Err(WireError::BigIntOverflow(bytes.len()));
                }
                value = U256::from_big_endian(bytes);
            }
            (_, wire_type) => skip_field(&mut buf, wire_type)?,
        }
    }

    Ok(value)
}

fn decode_event(mut buf: &[u8]) -> Result<Event, WireError> {
    let mut event = Event::new(String::new(), Vec::new());

    while buf.has_remaining() {
        match get_key(&mut buf)? {
            (1, WIRE_LEN) => event.kind = get_string(&mut buf, "event type")?,
            (2, WIRE_LEN) => event
                .attributes
                .push(decode_attribute(get_len_delimited(&mut buf)?)?),
            (_, wire_type) => skip_field(&mut buf, wire_type)?,
        }
    }

    Ok(event)
}

fn decode_attribute(mut buf: &[u8]) -> Result<Attribute, WireError> {
    let mut attribute = Attribute::new(String::new(), String::new());

    while buf.has_remaining() {
        match get_key(&mut buf)? {
            (1, WIRE_LEN) => attribute.key = get_string(&mut buf, "attribute key")?,
            (2, WIRE_LEN) => attribute.value = get_string(&mut buf, "attribute value")?,
            (_, wire_type) => skip_field(&mut buf, wire_type)?,
        }
    }

    Ok(attribute)
}

fn get_varint(buf: &mut &[u8]) -> Result<u64, WireError> {
    let mut value = 0u64;

    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(WireError::Truncated);
        }

        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }

    Err(WireError::VarintOverflow)
}

fn get_key(buf: &mut &[u8]) -> Result<(u64, u8), WireError> {
    let key = get_varint(buf)?;
    Ok((key >> 3, (key & 0x7) as u8))
}

fn get_len_delimited<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], WireError> {
    let len = usize::try_from(get_varint(buf)?).map_err(|_| WireError::Truncated)?;
    if buf.len() < len {
        return Err(WireError::Truncated);
    }

    let (field, rest) = buf.split_at(len);
    *buf = rest;
    Ok(field)
}

fn get_string(buf: &mut &[u8], field: &'static str) -> Result<String, WireError> {
    let raw = get_len_delimited(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8 { field })
}

fn skip_field(buf: &mut &[u8], wire_type: u8) -> Result<(), WireError> {
    let width = match wire_type {
        WIRE_VARINT => return get_varint(buf).map(|_| ()),
        WIRE_LEN => return get_len_delimited(buf).map(|_| ()),
        WIRE_FIXED64 => 8,
        WIRE_FIXED32 => 4,
        other => return Err(WireError::UnsupportedWireType(other)),
    };

    if buf.remaining() < width {
        return Err(WireError::Truncated);
    }
    buf.advance(width);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::builder::ChainGenerator;
    use dummy_chain_common::config::{ByteSize, ChainConfig, KIB};

    fn produced_blocks(block_size: u64, rounds: usize) -> Vec<Block> {
        let mut config = ChainConfig::development();
        config.production.block_size = ByteSize(block_size);

        let (mut generator, genesis) = ChainGenerator::from_genesis(&config);
        let mut blocks = vec![genesis];
        for _ in 0..rounds {
            blocks.extend(generator.produce_next());
        }
        blocks
    }

    #[test]
    fn test_roundtrip_produced_blocks() {
        // Covers genesis, plain blocks, skipped heights and reorg siblings
        for block in produced_blocks(2 * KIB, 20) {
            let payload = encode_block(&block);
            let decoded = decode_block(&payload).unwrap();
            assert_eq!(decoded, block);
        }
    }

    #[test]
    fn test_parent_at_height_zero_keeps_presence() {
        let blocks = produced_blocks(KIB, 1);
        let child = &blocks[1];
        assert_eq!(child.header.parent.as_ref().unwrap().num, 0);

        let decoded = decode_block(&encode_block(child)).unwrap();
        assert_eq!(decoded.header.parent, child.header.parent);

        let genesis = decode_block(&encode_block(&blocks[0])).unwrap();
        assert!(genesis.header.parent.is_none());
    }

    #[test]
    fn test_estimate_tracks_encoded_size() {
        let block = produced_blocks(64 * KIB, 1).pop().unwrap();
        let encoded = encode_block(&block).len() as f64;
        let estimated = block.approximated_size() as f64;

        assert!(encoded >= estimated);
        assert!((encoded - estimated) / encoded < 0.05);
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let block = produced_blocks(KIB, 2).pop().unwrap();
        let mut payload = BytesMut::from(&encode_block(&block)[..]);

        put_uint(&mut payload, 15, 42);
        put_str(&mut payload, 16, "ignored");
        put_key(&mut payload, 17, WIRE_FIXED32);
        payload.put_u32(7);

        assert_eq!(decode_block(&payload).unwrap(), block);
    }

    #[test]
    fn test_truncated_payload() {
        let block = produced_blocks(KIB, 2).pop().unwrap();
        let payload = encode_block(&block);

        let result = decode_block(&payload[..payload.len() - 3]);
        assert_eq!(result, Err(WireError::Truncated));
    }

    #[test]
    fn test_malformed_payloads() {
        assert_eq!(decode_block(&[0xffu8; 11]), Err(WireError::VarintOverflow));
        assert_eq!(decode_block(&[0u8; 0]), Err(WireError::MissingHeader));
        assert_eq!(
            decode_block(&[(3u8 << 3) | 3]),
            Err(WireError::UnsupportedWireType(3))
        );

        // Header holding a hash that is not UTF-8
        let mut header = BytesMut::new();
        put_bytes(&mut header, 2, &[0xc3, 0x28]);
        let mut payload = BytesMut::new();
        put_message(&mut payload, 1, &header);
        assert_eq!(
            decode_block(&payload),
            Err(WireError::InvalidUtf8 { field: "hash" })
        );
    }

    #[test]
    fn test_oversized_big_int() {
        let mut big_int = BytesMut::new();
        put_bytes(&mut big_int, 1, &[1u8; 33]);
        assert_eq!(decode_big_int(&big_int), Err(WireError::BigIntOverflow(33)));
    }

    #[test]
    fn test_varint_encoding() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 300);
        assert_eq!(&buf[..], &[0xac, 0x02]);

        let mut slice = &buf[..];
        assert_eq!(get_varint(&mut slice), Ok(300));
        assert!(slice.is_empty());
    }
}
