use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed vocabulary of simulated transaction types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Transfer,
    Delegate,
    Undelegate,
    Reward,
    Slash,
}

impl TransactionType {
    /// Every type, in the order transactions cycle through them
    pub const ALL: [TransactionType; 5] = [
        TransactionType::Transfer,
        TransactionType::Delegate,
        TransactionType::Undelegate,
        TransactionType::Reward,
        TransactionType::Slash,
    ];

    /// Picks the type of the transaction at `index` within its block
    pub fn for_index(index: usize) -> Self {
        Self::ALL[index % Self::ALL.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Transfer => "transfer",
            TransactionType::Delegate => "delegate",
            TransactionType::Undelegate => "undelegate",
            TransactionType::Reward => "reward",
            TransactionType::Slash => "slash",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown transaction type {s:?}"))
    }
}

/// A simulated transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub hash: String,
    pub sender: String,
    pub receiver: String,
    /// Opaque payload, hex encoded in JSON
    #[serde(with = "hex_bytes", default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    pub amount: U256,
    pub fee: U256,
    pub success: bool,
    pub events: Vec<Event>,
}

/// An event emitted while executing a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: Vec<Attribute>,
}

impl Event {
    pub fn new(kind: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self {
            kind: kind.into(),
            attributes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Minimal big-endian representation of an unsigned integer, empty for zero
pub fn u256_to_be_bytes(value: &U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);

    let skip = buf.iter().take_while(|byte| **byte == 0).count();
    buf[skip..].to_vec()
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_cycle() {
        assert_eq!(TransactionType::for_index(0), TransactionType::Transfer);
        assert_eq!(TransactionType::for_index(4), TransactionType::Slash);
        assert_eq!(TransactionType::for_index(7), TransactionType::Undelegate);
        assert_eq!("reward".parse::<TransactionType>(), Ok(TransactionType::Reward));
        assert!("mint".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_minimal_big_endian() {
        assert!(u256_to_be_bytes(&U256::zero()).is_empty());
        assert_eq!(u256_to_be_bytes(&U256::from(1u64)), vec![1]);
        assert_eq!(
            u256_to_be_bytes(&U256::from((3u64 << 32) | 5)),
            vec![3, 0, 0, 0, 5]
        );
    }

    #[test]
    fn test_transaction_json_keeps_payload() {
        let trx = Transaction {
            kind: TransactionType::Slash,
            hash: "aa".to_string(),
            sender: "0xDEADBEEF".to_string(),
            receiver: "0xBAAAAAAD".to_string(),
            data: vec![0, 1, 255],
            amount: U256::from(10u64),
            fee: U256::zero(),
            success: false,
            events: vec![Event::new("token_transfer", vec![Attribute::new("foo", "bar")])],
        };

        let raw = serde_json::to_string(&trx).unwrap();
        assert!(raw.contains("\"type\":\"slash\""));
        assert!(raw.contains("\"data\":\"0001ff\""));

        let decoded: Transaction = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded, trx);
    }
}
