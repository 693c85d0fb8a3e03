// Block production, tracing and serving for Dummy Chain
pub mod block;
pub mod cmd;
pub mod node;
pub mod server;
pub mod tracer;

pub use block::{BlockProducer, ChainGenerator, Subscriptions};
pub use node::Node;
pub use tracer::{FirehoseTracer, Tracer};
