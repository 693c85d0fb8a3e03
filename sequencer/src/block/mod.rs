pub mod builder;
pub mod timer;
pub mod transactions;

pub use builder::ChainGenerator;
pub use timer::{BlockProducer, ProducerState, Subscriptions};
