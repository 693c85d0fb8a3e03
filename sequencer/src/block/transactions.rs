use dummy_chain_common::config::KIB;
use dummy_chain_common::size::transaction_size;
use dummy_chain_common::types::{
    make_fake_hash, Attribute, Block, Event, Transaction, TransactionType,
};
use primitive_types::U256;

/// Below this budget blocks are filled one small transaction at a time
pub const SMALL_BLOCK_THRESHOLD: usize = 10 * KIB as usize;

/// Payload carried by each transaction of a small block
pub const SMALL_PAYLOAD_SIZE: usize = 32;

/// Rough per-transaction overhead subtracted from large payloads
pub const TRANSACTION_OVERHEAD: usize = 250;

const FIXED_SENDER: &str = "0xDEADBEEF";
const FIXED_RECEIVER: &str = "0xBAAAAAAD";

/// Fills `block` with synthetic transactions until it roughly weighs `budget` bytes
pub fn populate(block: &mut Block, budget: usize) {
    let height = block.height();

    if budget < SMALL_BLOCK_THRESHOLD {
        let mut size = block.approximated_size();
        while size <= budget {
            let index = block.transactions.len() as u64;
            let trx = generate_transaction(height, index, SMALL_PAYLOAD_SIZE);
            size += transaction_size(&trx);
            block.transactions.push(trx);
        }
        return;
    }

    let count = target_transaction_count(budget);
    let payload_size = (budget / count).saturating_sub(TRANSACTION_OVERHEAD);

    block.transactions.reserve(count);
    for index in 0..count {
        block
            .transactions
            .push(generate_transaction(height, index as u64, payload_size));
    }
}

/// Estimated transaction count for a large block, ten at minimum.
///
/// Gives roughly 100 transactions at 100 KiB, 1000 at 1 MiB and 10000 at
/// 10 MiB.
pub fn target_transaction_count(budget: usize) -> usize {
    let exponent = ((budget as f64).log10() - 3.0).max(1.0);
    10f64.powf(exponent).floor() as usize
}

/// Builds transaction `index` of the block at `height`
pub fn generate_transaction(height: u64, index: u64, payload_size: usize) -> Transaction {
    let hash = make_fake_hash(height, index);

    let sender = if index % 7 == 0 {
        FIXED_SENDER.to_string()
    } else {
        format!("0x{}", &hash[..40])
    };

    let receiver = if index % 11 == 0 {
        FIXED_RECEIVER.to_string()
    } else {
        format!("0x{}", &hash[24..64])
    };

    let amount = if index % 3 == 0 {
        U256::zero()
    } else {
        U256::from((height << 32) | index)
    };

    Transaction {
        kind: TransactionType::for_index(index as usize),
        hash,
        sender,
        receiver,
        data: fill_payload(payload_size, height, index),
        amount,
        fee: U256::from(height) + U256::from(index),
        success: index % 13 != 0,
        events: generate_events(height),
    }
}

fn fill_payload(size: usize, height: u64, index: u64) -> Vec<u8> {
    (0..size as u64)
        .map(|offset| (height.wrapping_add(index).wrapping_add(offset) % 256) as u8)
        .collect()
}

/// Events attached to every transaction of the block at `height`
pub fn generate_events(height: u64) -> Vec<Event> {
    let mut events = vec![Event::new(
        "token_transfer",
        vec![Attribute::new("foo", "bar")],
    )];

    if height % 2 == 0 {
        events.push(Event::new(
            "coin_spent",
            vec![
                Attribute::new("spender", "fizz"),
                Attribute::new("amount", "buzz"),
            ],
        ));
    } else if height % 3 == 0 {
        events.push(Event::new(
            "delegate",
            vec![
                Attribute::new("delegator", "addr1"),
                Attribute::new("validator", "addr2"),
                Attribute::new("amount", "123456789"),
            ],
        ));
    } else if height % 5 == 0 {
        events.push(Event::new(
            "undelegate",
            vec![
                Attribute::new("delegator", "addr1"),
                Attribute::new("amount", "123456789"),
            ],
        ));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dummy_chain_common::config::MIB;

    fn empty_block(height: u64) -> Block {
        Block::genesis(format!("block-{height}"), height, Utc::now())
    }

    #[test]
    fn test_target_transaction_count() {
        assert_eq!(target_transaction_count(10 * KIB as usize), 10);
        assert_eq!(target_transaction_count(64 * KIB as usize), 65);
        assert_eq!(target_transaction_count(100 * KIB as usize), 102);
        assert_eq!(target_transaction_count(MIB as usize), 1048);
    }

    #[test]
    fn test_transaction_rules() {
        let first = generate_transaction(4, 0, 0);
        assert_eq!(first.sender, FIXED_SENDER);
        assert_eq!(first.receiver, FIXED_RECEIVER);
        assert!(first.amount.is_zero());
        assert!(!first.success);
        assert_eq!(first.kind, TransactionType::Transfer);
        assert_eq!(first.fee, U256::from(4u64));

        let second = generate_transaction(4, 1, 0);
        assert_eq!(second.sender, format!("0x{}", &second.hash[..40]));
        assert_eq!(second.receiver, format!("0x{}", &second.hash[24..]));
        assert_eq!(second.amount, U256::from((4u64 << 32) | 1));
        assert!(second.success);
        assert_eq!(second.kind, TransactionType::Delegate);

        assert_eq!(generate_transaction(4, 14, 0).sender, FIXED_SENDER);
        assert_eq!(generate_transaction(4, 22, 0).receiver, FIXED_RECEIVER);
        assert!(!generate_transaction(4, 26, 0).success);
    }

    #[test]
    fn test_payload_pattern() {
        let trx = generate_transaction(250, 3, 10);
        assert_eq!(trx.data, vec![253, 254, 255, 0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_events_first_match_wins() {
        let kinds = |height| {
            generate_events(height)
                .into_iter()
                .map(|event| event.kind)
                .collect::<Vec<_>>()
        };

        assert_eq!(kinds(6), vec!["token_transfer", "coin_spent"]);
        assert_eq!(kinds(9), vec!["token_transfer", "delegate"]);
        assert_eq!(kinds(25), vec!["token_transfer", "undelegate"]);
        assert_eq!(kinds(7), vec!["token_transfer"]);
    }

    #[test]
    fn test_population_is_deterministic() {
        let mut first = empty_block(42);
        let mut second = empty_block(42);
        populate(&mut first, 8 * KIB as usize);
        populate(&mut second, 8 * KIB as usize);

        assert!(!first.transactions.is_empty());
        assert_eq!(first.transactions, second.transactions);
    }

    #[test]
    fn test_small_budget_fills_up_to_budget() {
        let budget = 4 * KIB as usize;
        let mut block = empty_block(3);
        populate(&mut block, budget);

        let size = block.approximated_size();
        assert!(size > budget);

        let last = block.transactions.pop().unwrap();
        assert!(block.approximated_size() <= budget);
        assert_eq!(last.data.len(), SMALL_PAYLOAD_SIZE);
    }

    #[test]
    fn test_large_budget_stays_close_to_target() {
        for budget in [64 * KIB as usize, 256 * KIB as usize, MIB as usize] {
            let mut block = empty_block(11);
            populate(&mut block, budget);

            assert_eq!(block.transactions.len(), target_transaction_count(budget));

            let size = block.approximated_size() as f64;
            let drift = (size - budget as f64).abs() / budget as f64;
            assert!(drift < 0.10, "budget {budget} produced {size} bytes");
        }
    }

    #[test]
    fn test_zero_budget_adds_nothing() {
        let mut block = empty_block(1);
        populate(&mut block, 0);
        assert!(block.transactions.is_empty());
    }
}
