//! The global configuration used across all chain-it crates.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy::primitives::Address;
use anyhow::{Context as _, Result};
use chain_it_common::{
    futures::PollingWaitBehavior,
    types::{Account, parse_address},
};
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Parser, Clone, Serialize, Deserialize)]
#[command(name = "chain-it")]
pub struct Arguments {
    /// The directory the node and cli binaries are built into.
    ///
    /// Binaries are looked up here first and in `$PATH` afterwards.
    #[arg(long = "build-dir", default_value = "../../build")]
    pub build_directory: PathBuf,

    /// The node executable.
    #[arg(long = "node", default_value = "ann")]
    pub node: PathBuf,

    /// The arguments the node is started with.
    #[arg(long = "node-arg", default_value = "run", allow_hyphen_values = true)]
    pub node_args: Vec<String>,

    /// The cli client executable.
    #[arg(long = "cli", default_value = "anntool")]
    pub cli: PathBuf,

    /// The node's JSON-RPC query endpoint.
    #[arg(long = "query-endpoint", default_value = "http://127.0.0.1:46657")]
    pub query_endpoint: String,

    /// The node's runtime data directory.
    ///
    /// Defaults to `$HOME/.angine`.
    #[arg(long = "runtime-dir")]
    pub runtime_directory: Option<PathBuf>,

    /// The directory containing the contract payload and ABI files read by the cli client.
    #[arg(long = "contracts-dir", default_value = "./contract")]
    pub contracts_directory: PathBuf,

    /// A place to store the node logs and the suite report.
    ///
    /// A temporary directory is used if not specified.
    #[arg(long = "workdir", short)]
    pub working_directory: Option<PathBuf>,

    /// The private key of the account sending all transactions.
    #[arg(
        long = "sender-key",
        default_value = "1956be6c7e5128bd1c44c389ba21bd63cfb054d5adb2ab3f8d968f74b9bd0b6b"
    )]
    pub sender_private_key: String,

    /// The public key of the sending account.
    #[arg(
        long = "sender-pubkey",
        default_value = "04e329956f162146cad0d07ddecb5f95329542b1b3badf5b4fe507fd6f0556118326d251e051bdc080bd0f50c0b94d054bcd9b25a2177003296e76a8c07d9b6e22"
    )]
    pub sender_public_key: String,

    /// The address of the sending account. It has to be funded in the node's genesis.
    #[arg(
        long = "sender-address",
        default_value = "addafebb1c4618f8f8b452dab6d53721f1d9fda6"
    )]
    pub sender_address: String,

    /// The address receiving transfers.
    #[arg(
        long = "receiver",
        default_value = "C7038C9F5FDE83EB3A6341EA8AC95D05BCB3BBAB"
    )]
    pub receiver: String,

    /// The value sent by the transfer scenarios.
    #[arg(long = "value", default_value = "999")]
    pub transfer_value: u64,

    /// The maximum time in milliseconds to wait for the node to answer queries after it started.
    #[arg(long = "node-start-timeout", default_value = "10000")]
    pub node_start_timeout: u64,

    /// The maximum time in milliseconds to wait for a submitted operation to settle.
    #[arg(long = "settle-timeout", default_value = "30000")]
    pub settle_timeout: u64,

    /// The time in milliseconds between two post-condition queries.
    #[arg(
        long = "settle-interval",
        default_value = "1000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub settle_interval: u64,

    /// Leave the node running when the suite ends.
    #[arg(long = "keep-node-running")]
    pub keep_node_running: bool,

    /// Emit the logs as JSON.
    #[arg(long = "log-json")]
    pub log_json: bool,
}

impl Arguments {
    /// Return the configured working directory, panicking if none was configured.
    ///
    /// The binary fills in a temporary directory before any component reads it.
    pub fn directory(&self) -> &Path {
        match &self.working_directory {
            Some(path) => path.as_path(),
            None => panic!("should have a workdir configured"),
        }
    }

    /// The node's runtime data directory with the following precedence:
    /// 1. `self.runtime_directory` if it was provided.
    /// 2. `.angine` under the user's home directory.
    pub fn runtime_directory(&self) -> Option<PathBuf> {
        if let Some(path) = &self.runtime_directory {
            return Some(path.clone());
        }
        directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".angine"))
    }

    pub fn sender(&self) -> Result<Account> {
        Account::new(
            &self.sender_address,
            &self.sender_private_key,
            &self.sender_public_key,
        )
        .context("Invalid sender account")
    }

    pub fn receiver(&self) -> Result<Address> {
        parse_address(&self.receiver).context("Invalid receiver address")
    }

    pub fn contract_fixtures(&self) -> ContractFixtures {
        ContractFixtures::new(&self.contracts_directory)
    }

    pub fn node_start_timeout(&self) -> Duration {
        Duration::from_millis(self.node_start_timeout)
    }

    /// The polling used while waiting for submitted operations to settle.
    pub fn settle_polling(&self) -> (Duration, PollingWaitBehavior) {
        (
            Duration::from_millis(self.settle_timeout),
            PollingWaitBehavior::Constant(Duration::from_millis(self.settle_interval)),
        )
    }
}

impl Default for Arguments {
    fn default() -> Self {
        Arguments::parse_from(["chain-it"])
    }
}

/// The contract payload and ABI files each contract scenario hands to the cli client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractFixtures {
    pub abi: PathBuf,
    pub create: PathBuf,
    pub exist: PathBuf,
    pub execute: PathBuf,
    pub read: PathBuf,
}

impl ContractFixtures {
    const ABI_FILE: &str = "sample.abi";
    const CREATE_FILE: &str = "sample.json";
    const EXIST_FILE: &str = "sample_exist.json";
    const EXECUTE_FILE: &str = "sample_execute.json";
    const READ_FILE: &str = "sample_read.json";

    pub fn new(directory: &Path) -> Self {
        Self {
            abi: directory.join(Self::ABI_FILE),
            create: directory.join(Self::CREATE_FILE),
            exist: directory.join(Self::EXIST_FILE),
            execute: directory.join(Self::EXECUTE_FILE),
            read: directory.join(Self::READ_FILE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_fixture_accounts() {
        let config = Arguments::default();

        let sender = config.sender().unwrap();
        let receiver = config.receiver().unwrap();

        assert_eq!(
            sender.address,
            parse_address("addafebb1c4618f8f8b452dab6d53721f1d9fda6").unwrap()
        );
        assert_eq!(
            receiver,
            parse_address("c7038c9f5fde83eb3a6341ea8ac95d05bcb3bbab").unwrap()
        );
        assert_eq!(config.transfer_value, 999);
        assert_eq!(config.node_args, vec!["run".to_string()]);
    }

    #[test]
    fn explicit_runtime_directory_takes_precedence() {
        let config = Arguments::parse_from(["chain-it", "--runtime-dir", "/tmp/angine"]);
        assert_eq!(
            config.runtime_directory(),
            Some(PathBuf::from("/tmp/angine"))
        );
    }

    #[test]
    fn contract_fixtures_live_in_the_contracts_directory() {
        let config = Arguments::parse_from(["chain-it", "--contracts-dir", "fixtures"]);
        let fixtures = config.contract_fixtures();

        assert_eq!(fixtures.create, PathBuf::from("fixtures/sample.json"));
        assert_eq!(fixtures.abi, PathBuf::from("fixtures/sample.abi"));
        assert_eq!(fixtures.read, PathBuf::from("fixtures/sample_read.json"));
    }

    #[test]
    fn zero_settle_intervals_are_rejected() {
        let result = Arguments::try_parse_from(["chain-it", "--settle-interval", "0"]);
        assert!(result.is_err());

        let config = Arguments::parse_from(["chain-it", "--settle-interval", "5"]);
        assert_eq!(config.settle_interval, 5);
    }
}
