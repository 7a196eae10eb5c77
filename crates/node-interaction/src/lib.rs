//! This crate implements all interactions with the node under test: nonce queries against its
//! JSON-RPC endpoint and invocations of the cli client, together with the parsing of their output.

pub mod cli;
pub mod command;
pub mod nonce;
pub mod output;

pub use cli::CliOperation;
pub use command::{CommandError, CommandOutput, CommandRunner, PendingOutput};
pub use nonce::NonceClient;
pub use output::{TransactionHash, UnexpectedOutputFormat};
