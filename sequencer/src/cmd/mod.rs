pub mod cli;

pub use cli::{CliArgs, Command, StartArgs, TracerKind};
