//! Extraction of the fields the harness needs from the cli client's free-text output.
//!
//! The cli client has no structured output mode, so the phrasing below is the contract:
//!
//! - `evm create` prints `txHash:<hash>contract address: <address>`.
//! - `tx send` and `evm execute` print `txHash:<hash>`.
//! - `query balance` ends its output with the balance in decimal.

use std::{fmt::Display, str::FromStr};

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TX_HASH_LABEL: &str = "txHash:";
pub const CONTRACT_MARKER: &str = "contract";
pub const CONTRACT_ADDRESS_LABEL: &str = "address";

/// Extracts the transaction hash from the output of a contract creation.
///
/// The output is split on the contract marker and the hash is read from the segment before it.
pub fn extract_tx_hash(raw: &str) -> Result<TransactionHash, UnexpectedOutputFormat> {
    let (hash_segment, _) = split_on_contract_marker(raw)?;
    parse_hash_segment(raw, hash_segment)
}

/// Extracts the transaction hash from output that consists of the labelled hash only, as printed
/// by contract executions and transfers.
pub fn extract_execute_tx_hash(raw: &str) -> Result<TransactionHash, UnexpectedOutputFormat> {
    parse_hash_segment(raw, raw)
}

/// Extracts the address of the created contract from the output of a contract creation.
pub fn extract_contract_address(raw: &str) -> Result<Address, UnexpectedOutputFormat> {
    let (_, address_segment) = split_on_contract_marker(raw)?;
    let address = address_segment
        .trim_start()
        .strip_prefix(CONTRACT_ADDRESS_LABEL)
        .ok_or_else(|| UnexpectedOutputFormat::MissingLabel {
            label: CONTRACT_ADDRESS_LABEL,
            raw: raw.to_owned(),
        })?
        .trim_start()
        .trim_start_matches(':')
        .trim();

    address
        .parse()
        .map_err(|_| UnexpectedOutputFormat::InvalidValue {
            field: "contract address",
            value: address.to_owned(),
            raw: raw.to_owned(),
        })
}

/// Extracts the balance from the output of a balance query: the last decimal number it contains.
pub fn extract_balance(raw: &str) -> Result<U256, UnexpectedOutputFormat> {
    let digits = raw
        .split(|c: char| !c.is_ascii_digit())
        .filter(|digits| !digits.is_empty())
        .next_back()
        .ok_or_else(|| UnexpectedOutputFormat::MissingValue {
            field: "balance",
            raw: raw.to_owned(),
        })?;

    U256::from_str_radix(digits, 10).map_err(|_| UnexpectedOutputFormat::InvalidValue {
        field: "balance",
        value: digits.to_owned(),
        raw: raw.to_owned(),
    })
}

fn split_on_contract_marker(raw: &str) -> Result<(&str, &str), UnexpectedOutputFormat> {
    raw.split_once(CONTRACT_MARKER)
        .ok_or_else(|| UnexpectedOutputFormat::MissingMarker {
            marker: CONTRACT_MARKER,
            raw: raw.to_owned(),
        })
}

fn parse_hash_segment(raw: &str, segment: &str) -> Result<TransactionHash, UnexpectedOutputFormat> {
    let hash = segment
        .trim()
        .strip_prefix(TX_HASH_LABEL)
        .ok_or_else(|| UnexpectedOutputFormat::MissingLabel {
            label: TX_HASH_LABEL,
            raw: raw.to_owned(),
        })?
        .trim();

    hash.parse()
        .map_err(|_| UnexpectedOutputFormat::InvalidValue {
            field: "transaction hash",
            value: hash.to_owned(),
            raw: raw.to_owned(),
        })
}

/// The hash of a submitted transaction, kept exactly as the cli client printed it so that it can be
/// handed back to the receipt query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(String);

impl TransactionHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TransactionHash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("'{s}' is not a hex encoded transaction hash");
        }
        Ok(Self(s.to_owned()))
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The cli output did not have the shape the harness depends on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnexpectedOutputFormat {
    #[error("Unexpected cli output format: missing the '{label}' label in {raw:?}")]
    MissingLabel { label: &'static str, raw: String },

    #[error("Unexpected cli output format: missing the '{marker}' marker in {raw:?}")]
    MissingMarker { marker: &'static str, raw: String },

    #[error("Unexpected cli output format: no {field} in {raw:?}")]
    MissingValue { field: &'static str, raw: String },

    #[error("Unexpected cli output format: '{value}' is not a valid {field} in {raw:?}")]
    InvalidValue {
        field: &'static str,
        value: String,
        raw: String,
    },
}
