use sha2::{Digest, Sha256};

/// Synthetic block hash derived from the height and an optional nonce.
///
/// Sibling and flash blocks use a nonce so they never share a hash with the
/// canonical block produced at the same height.
pub fn make_block_hash(height: u64, nonce: Option<u64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(height.to_string().as_bytes());

    if let Some(nonce) = nonce {
        hasher.update(nonce.to_le_bytes());
    }

    hex::encode(hasher.finalize())
}

/// Fast 32-byte transaction hash built from bit operations on the block
/// height and transaction index. Collisions are acceptable.
pub fn make_fake_hash(block_height: u64, tx_index: u64) -> String {
    let mut hash = [0u8; 32];

    hash[0..8].copy_from_slice(&block_height.to_be_bytes());
    hash[8..16].copy_from_slice(&(block_height ^ 0xAAAA_AAAA_AAAA_AAAA).to_be_bytes());
    hash[16..24].copy_from_slice(&tx_index.to_be_bytes());
    hash[24..32].copy_from_slice(&((tx_index << 32) | (block_height & 0xFFFF_FFFF)).to_be_bytes());

    hex::encode(hash)
}
