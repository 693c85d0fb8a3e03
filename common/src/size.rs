//! Cheap approximation of a block's wire-encoded size.
//!
//! Called once per transaction while filling small blocks, so it never
//! serializes anything: it sums per-field varint and length costs plus one
//! tag byte for every populated field.

use primitive_types::U256;

use crate::types::{Block, BlockHeader, Event, Transaction};

impl Block {
    /// Approximates how big the block would be once encoded on the wire
    pub fn approximated_size(&self) -> usize {
        header_size(&self.header)
            + self
                .transactions
                .iter()
                .map(transaction_size)
                .sum::<usize>()
    }
}

fn header_size(header: &BlockHeader) -> usize {
    let mut size = 0;

    size += field(varint_field(header.height));
    size += field(len_field(header.hash.len()));
    if let Some(parent) = &header.parent {
        size += field(varint_size(parent.num));
        size += field(len_field(parent.hash.len()));
    }
    size += field(varint_field(header.finality.num));
    size += field(len_field(header.finality.hash.len()));
    size += field(signed_varint_size(header.timestamp_nanos()));

    size
}

/// Approximated size of a single transaction, events included
pub fn transaction_size(trx: &Transaction) -> usize {
    let mut size = 0;

    size += field(len_field(trx.kind.as_str().len()));
    size += field(len_field(trx.hash.len()));
    size += field(len_field(trx.sender.len()));
    size += field(len_field(trx.receiver.len()));
    size += field(len_field(trx.data.len()));
    size += field(big_int_size(&trx.amount));
    size += field(big_int_size(&trx.fee));
    if trx.success {
        size += field(1);
    }

    size + trx.events.iter().map(event_size).sum::<usize>()
}

fn event_size(event: &Event) -> usize {
    let attributes: usize = event
        .attributes
        .iter()
        .map(|attr| field(len_field(attr.key.len())) + field(len_field(attr.value.len())))
        .sum();

    field(len_field(event.kind.len())) + attributes
}

/// Adds the tag byte to a populated field, empty fields cost nothing
fn field(cost: usize) -> usize {
    if cost == 0 {
        0
    } else {
        cost + 1
    }
}

fn varint_field(value: u64) -> usize {
    if value == 0 {
        0
    } else {
        varint_size(value)
    }
}

fn len_field(len: usize) -> usize {
    if len == 0 {
        0
    } else {
        len + varint_size(len as u64)
    }
}

fn big_int_size(value: &U256) -> usize {
    let byte_count = (value.bits() + 7) / 8;
    len_field(byte_count)
}

/// Size of the varint encoding of `value`, capped at five bytes
pub fn varint_size(value: u64) -> usize {
    match value {
        v if v < 1 << 7 => 1,
        v if v < 1 << 14 => 2,
        v if v < 1 << 21 => 3,
        v if v < 1 << 28 => 4,
        _ => 5,
    }
}

fn signed_varint_size(value: i64) -> usize {
    if value < 0 {
        10
    } else {
        varint_field(value as u64)
    }
}
