use std::{fmt::Display, str::FromStr};

use alloy::primitives::Address;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

/// An account used as a test fixture.
///
/// Accounts are configured once per suite and never created or destroyed by the harness. The keys
/// are kept in the hex form the cli client expects them in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub private_key: HexString,
    pub public_key: HexString,
}

impl Account {
    pub fn new(address: &str, private_key: &str, public_key: &str) -> Result<Self> {
        Ok(Self {
            address: parse_address(address)?,
            private_key: private_key.parse().context("Invalid account private key")?,
            public_key: public_key.parse().context("Invalid account public key")?,
        })
    }
}

/// Normalizes an address given in any of the forms the fixtures use (with or without a `0x`
/// prefix, upper or lower case) into its canonical 20 byte encoding.
pub fn parse_address(address: &str) -> Result<Address> {
    let address = address.trim();
    address
        .parse::<Address>()
        .with_context(|| format!("Invalid account address '{address}'"))
}

/// Renders an address the way the cli client receives it: lower case hex without a prefix.
pub fn cli_address(address: &Address) -> String {
    hex::encode(address.as_slice())
}

/// A non-empty hex string with the `0x` prefix stripped.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexString(String);

impl HexString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for HexString {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() {
            anyhow::bail!("expected a hex string but got an empty value");
        }
        if let Some(invalid) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
            anyhow::bail!("'{s}' is not a hex string, found '{invalid}'");
        }
        Ok(Self(digits.to_owned()))
    }
}

impl TryFrom<String> for HexString {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HexString> for String {
    fn from(value: HexString) -> Self {
        value.0
    }
}

impl Display for HexString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
