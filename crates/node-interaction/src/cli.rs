//! The argument templates of the cli client operations the harness drives.

use std::path::{Path, PathBuf};

use alloy::primitives::Address;
use chain_it_common::types::{HexString, cli_address};

use crate::output::TransactionHash;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CliOperation {
    /// `tx send`: transfers `value` from the account owning `private_key` to `to`.
    TransferSend {
        private_key: HexString,
        to: Address,
        value: u64,
        nonce: u64,
    },
    /// `evm create`: deploys the contract described by the call file.
    ContractCreate {
        call_file: PathBuf,
        abi_file: PathBuf,
        nonce: u64,
    },
    /// `evm exist`: checks whether the contract described by the call file is deployed.
    ContractExist { call_file: PathBuf },
    ContractExecute {
        call_file: PathBuf,
        abi_file: PathBuf,
        nonce: u64,
    },
    ContractRead {
        call_file: PathBuf,
        abi_file: PathBuf,
        nonce: u64,
    },
    QueryBalance { address: Address },
    QueryReceipt { hash: TransactionHash },
}

impl CliOperation {
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::TransferSend {
                private_key,
                to,
                value,
                nonce,
            } => vec![
                "tx".into(),
                "send".into(),
                "--privkey".into(),
                private_key.to_string(),
                "--to".into(),
                cli_address(to),
                "--value".into(),
                value.to_string(),
                "--nonce".into(),
                nonce.to_string(),
            ],
            Self::ContractCreate {
                call_file,
                abi_file,
                nonce,
            } => evm_args("create", call_file, Some(abi_file.as_path()), Some(*nonce)),
            Self::ContractExist { call_file } => evm_args("exist", call_file, None, None),
            Self::ContractExecute {
                call_file,
                abi_file,
                nonce,
            } => evm_args("execute", call_file, Some(abi_file.as_path()), Some(*nonce)),
            Self::ContractRead {
                call_file,
                abi_file,
                nonce,
            } => evm_args("read", call_file, Some(abi_file.as_path()), Some(*nonce)),
            Self::QueryBalance { address } => vec![
                "query".into(),
                "balance".into(),
                "--address".into(),
                cli_address(address),
            ],
            Self::QueryReceipt { hash } => vec![
                "query".into(),
                "receipt".into(),
                "--hash".into(),
                hash.to_string(),
            ],
        }
    }
}

fn evm_args(
    subcommand: &str,
    call_file: &Path,
    abi_file: Option<&Path>,
    nonce: Option<u64>,
) -> Vec<String> {
    let mut args = vec![
        "evm".to_string(),
        subcommand.to_string(),
        "--callf".to_string(),
        call_file.display().to_string(),
    ];
    if let Some(abi_file) = abi_file {
        args.extend(["--abif".to_string(), abi_file.display().to_string()]);
    }
    if let Some(nonce) = nonce {
        args.extend(["--nonce".to_string(), nonce.to_string()]);
    }
    args
}
