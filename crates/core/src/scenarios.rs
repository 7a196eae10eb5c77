//! The lifecycle scenarios driven against the node.
//!
//! Every scenario follows the same shape: read a fresh nonce for the sender where the operation
//! needs one, submit the operation through the cli client, wait for its completion, extract the
//! transaction hash where the follow-up query needs it, and query the resulting state until the
//! expected post-condition holds.

use std::{fmt::Display, ops::ControlFlow, sync::Mutex, time::Instant};

use alloy::primitives::{Address, U256};
use anyhow::{Context as _, Result, bail};
use chain_it_common::futures::poll;
use chain_it_node_interaction::{
    CliOperation, CommandError, CommandOutput, TransactionHash,
    output::{
        extract_balance, extract_contract_address, extract_execute_tx_hash, extract_tx_hash,
    },
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::{context::TestContext, report::ScenarioReport};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize,
)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Transfers value to the receiver and checks its balance.
    Transfer,
    /// Deploys the sample contract and waits for its receipt.
    ContractCreate,
    /// Checks whether the sample contract exists.
    ContractExist,
    /// Executes a call against the sample contract and waits for its receipt.
    ContractExecute,
    /// Reads from the sample contract.
    ContractRead,
    /// Reads the sender nonce twice without submitting anything in between.
    NonceIdempotence,
    /// Submits a transfer twice with the same nonce.
    NonceReplay,
}

impl Scenario {
    pub const ALL: [Self; 7] = [
        Self::Transfer,
        Self::ContractCreate,
        Self::ContractExist,
        Self::ContractExecute,
        Self::ContractRead,
        Self::NonceIdempotence,
        Self::NonceReplay,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::ContractCreate => "contract-create",
            Self::ContractExist => "contract-exist",
            Self::ContractExecute => "contract-execute",
            Self::ContractRead => "contract-read",
            Self::NonceIdempotence => "nonce-idempotence",
            Self::NonceReplay => "nonce-replay",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer value to the receiver and check its balance",
            Self::ContractCreate => "deploy the sample contract and wait for its receipt",
            Self::ContractExist => "check whether the sample contract exists",
            Self::ContractExecute => "execute the sample contract and wait for its receipt",
            Self::ContractRead => "read from the sample contract",
            Self::NonceIdempotence => "read the sender nonce twice",
            Self::NonceReplay => "submit two transfers with the same nonce",
        }
    }
}

impl Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs a single scenario against a [`TestContext`].
///
/// The runner remembers the output of the latest cli invocation so that failures can be reported
/// together with what the cli printed last.
pub struct ScenarioRunner<'a> {
    context: &'a TestContext,
    last_output: Option<String>,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(context: &'a TestContext) -> Self {
        Self {
            context,
            last_output: None,
        }
    }

    /// Runs `scenario` to completion. Failures are captured in the report, never propagated.
    pub async fn run(mut self, scenario: Scenario) -> ScenarioReport {
        let span = tracing::info_span!("scenario", %scenario);
        let started = Instant::now();

        let result = self.execute(scenario).instrument(span.clone()).await;

        span.in_scope(|| match &result {
            Ok(output) => tracing::info!(%output, "Scenario passed"),
            Err(error) => tracing::error!(
                error = %format!("{error:#}"),
                last_output = self.last_output.as_deref(),
                "Scenario failed"
            ),
        });

        ScenarioReport::new(scenario, result, self.last_output, started.elapsed())
    }

    async fn execute(&mut self, scenario: Scenario) -> Result<String> {
        match scenario {
            Scenario::Transfer => self.transfer().await,
            Scenario::ContractCreate => self.contract_create().await,
            Scenario::ContractExist => self.contract_exist().await,
            Scenario::ContractExecute => self.contract_execute().await,
            Scenario::ContractRead => self.contract_read().await,
            Scenario::NonceIdempotence => self.nonce_idempotence().await,
            Scenario::NonceReplay => self.nonce_replay().await,
        }
    }

    async fn transfer(&mut self) -> Result<String> {
        let receiver = self.context.receiver();
        let value = self.context.config().transfer_value;

        let (before, _) = self
            .query_balance(receiver)
            .await
            .context("Failed to read the receiver balance before the transfer")?;
        let nonce = self.fresh_nonce().await?;

        self.submit(self.transfer_operation(value, nonce))
            .await
            .context("Failed to submit the transfer")?;

        let (after, output) = self.await_balance_change(receiver, before).await?;
        let expected = before + U256::from(value);
        if after != expected {
            bail!(
                "The receiver balance went from {before} to {after} after a transfer of {value}, expected {expected}"
            );
        }
        Ok(output)
    }

    async fn contract_create(&mut self) -> Result<String> {
        let nonce = self.fresh_nonce().await?;
        let contracts = self.context.contracts();

        let output = self
            .submit(CliOperation::ContractCreate {
                call_file: contracts.create.clone(),
                abi_file: contracts.abi.clone(),
                nonce,
            })
            .await
            .context("Failed to submit the contract creation")?
            .stdout_text();

        let hash = extract_tx_hash(&output)?;
        match extract_contract_address(&output) {
            Ok(address) => tracing::info!(%hash, %address, "Contract creation submitted"),
            Err(error) => tracing::debug!(%hash, %error, "Contract creation submitted"),
        }

        Ok(self.await_receipt(hash).await?.stdout_text())
    }

    async fn contract_exist(&mut self) -> Result<String> {
        let output = self
            .invoke(CliOperation::ContractExist {
                call_file: self.context.contracts().exist.clone(),
            })
            .await
            .context("Failed to check the contract existence")?;
        Ok(output.stdout_text())
    }

    async fn contract_execute(&mut self) -> Result<String> {
        let nonce = self.fresh_nonce().await?;
        let contracts = self.context.contracts();

        let output = self
            .submit(CliOperation::ContractExecute {
                call_file: contracts.execute.clone(),
                abi_file: contracts.abi.clone(),
                nonce,
            })
            .await
            .context("Failed to submit the contract execution")?
            .stdout_text();

        let hash = extract_execute_tx_hash(&output)?;
        tracing::info!(%hash, "Contract execution submitted");

        Ok(self.await_receipt(hash).await?.stdout_text())
    }

    async fn contract_read(&mut self) -> Result<String> {
        let nonce = self.fresh_nonce().await?;
        let contracts = self.context.contracts();

        let output = self
            .invoke(CliOperation::ContractRead {
                call_file: contracts.read.clone(),
                abi_file: contracts.abi.clone(),
                nonce,
            })
            .await
            .context("Failed to read from the contract")?;
        Ok(output.stdout_text())
    }

    async fn nonce_idempotence(&mut self) -> Result<String> {
        let first = self.fresh_nonce().await?;
        let second = self.fresh_nonce().await?;
        if first != second {
            bail!("Two consecutive nonce reads returned {first} and {second}");
        }
        Ok(format!("nonce {first} read twice"))
    }

    async fn nonce_replay(&mut self) -> Result<String> {
        let value = self.context.config().transfer_value;
        let nonce = self.fresh_nonce().await?;

        let first = self
            .submit(self.transfer_operation(value, nonce))
            .await
            .context("Failed to submit the first transfer")?;
        self.await_nonce_after(nonce).await?;

        match self.submit(self.transfer_operation(value, nonce)).await {
            Ok(second) if second.stdout != first.stdout => Ok(format!(
                "nonce {nonce} was rejected on reuse: {}",
                second.stdout_text().trim()
            )),
            Ok(_) => bail!("The node accepted nonce {nonce} twice"),
            Err(error) if is_rejection(&error) => Ok(format!(
                "nonce {nonce} was rejected on reuse: {:#}",
                error
            )),
            Err(error) => Err(error.context("Failed to submit the replayed transfer")),
        }
    }

    fn transfer_operation(&self, value: u64, nonce: u64) -> CliOperation {
        CliOperation::TransferSend {
            private_key: self.context.sender().private_key.clone(),
            to: self.context.receiver(),
            value,
            nonce,
        }
    }

    async fn fresh_nonce(&self) -> Result<u64> {
        let address = self.context.sender().address;
        let nonce = self
            .context
            .nonce_client()
            .get_nonce(address)
            .await
            .with_context(|| format!("Failed to fetch the nonce of {address}"))?;
        tracing::debug!(%address, nonce, "Fetched a fresh nonce");
        Ok(nonce)
    }

    /// Submits the operation on a background task and waits for its completion signal.
    async fn submit(&mut self, operation: CliOperation) -> Result<CommandOutput> {
        let pending = self.context.cli().spawn(operation.args());
        let result = pending.wait().await;
        self.record(&result);
        result
    }

    /// Runs the operation in the foreground.
    async fn invoke(&mut self, operation: CliOperation) -> Result<CommandOutput> {
        let result = self.context.cli().run(operation.args()).await;
        self.record(&result);
        result
    }

    fn record(&mut self, result: &Result<CommandOutput>) {
        let output = match result {
            Ok(output) => Some(output),
            Err(error) => failed_output(error),
        };
        if let Some(output) = output {
            self.last_output = Some(captured_text(output));
        }
    }

    async fn query_balance(&mut self, address: Address) -> Result<(U256, String)> {
        let output = self
            .invoke(CliOperation::QueryBalance { address })
            .await?
            .stdout_text();
        Ok((extract_balance(&output)?, output))
    }

    /// Queries the receipt of `hash` until the cli client finds it.
    async fn await_receipt(&mut self, hash: TransactionHash) -> Result<CommandOutput> {
        self.await_settled(CliOperation::QueryReceipt { hash: hash.clone() }, |_| {
            Ok(ControlFlow::Break(()))
        })
        .await
        .with_context(|| format!("The receipt of {hash} did not become available"))
    }

    /// Queries the balance of `address` until it differs from `before`.
    async fn await_balance_change(
        &mut self,
        address: Address,
        before: U256,
    ) -> Result<(U256, String)> {
        let output = self
            .await_settled(CliOperation::QueryBalance { address }, |output| {
                let balance = extract_balance(&output.stdout_text())?;
                Ok(if balance == before {
                    ControlFlow::Continue(format!("the balance is still {balance}"))
                } else {
                    ControlFlow::Break(())
                })
            })
            .await
            .with_context(|| format!("The balance of {address} did not change"))?;

        let text = output.stdout_text();
        Ok((extract_balance(&text)?, text))
    }

    /// Runs `query` until `settled` accepts its output or the settle timeout passes.
    ///
    /// A query the cli client fails is retried like an unsettled one, since the node may not have
    /// processed the submission yet. Failing to run the cli at all ends the polling. Whatever the
    /// outcome, the output of the latest attempt is recorded.
    async fn await_settled(
        &mut self,
        query: CliOperation,
        settled: impl Fn(&CommandOutput) -> Result<ControlFlow<(), String>>,
    ) -> Result<CommandOutput> {
        let (duration, behavior) = self.context.config().settle_polling();
        let cli = self.context.cli();
        let args = query.args();
        let latest = Mutex::new(None);
        let (latest_ref, settled) = (&latest, &settled);

        let result = poll(duration, behavior, || {
            let attempt = cli.run(args.clone());
            async move {
                let output = match attempt.await {
                    Ok(output) => output,
                    Err(error) => {
                        return match failed_output(&error).map(captured_text) {
                            Some(text) => {
                                remember(latest_ref, text);
                                Ok(ControlFlow::Continue(format!("{error:#}")))
                            }
                            None => Err(error),
                        };
                    }
                };
                remember(latest_ref, captured_text(&output));

                Ok(match settled(&output)? {
                    ControlFlow::Break(()) => ControlFlow::Break(output),
                    ControlFlow::Continue(reason) => ControlFlow::Continue(reason),
                })
            }
        })
        .await;

        if let Ok(Some(text)) = latest.into_inner() {
            self.last_output = Some(text);
        }
        result
    }

    /// Queries the sender nonce until the node has moved past `nonce`.
    async fn await_nonce_after(&self, nonce: u64) -> Result<()> {
        let (duration, behavior) = self.context.config().settle_polling();
        let nonce_client = self.context.nonce_client();
        let address = self.context.sender().address;

        poll(duration, behavior, || async move {
            let current = nonce_client.get_nonce(address).await?;
            Ok(if current > nonce {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(format!("the nonce is still {current}"))
            })
        })
        .await
        .with_context(|| format!("The node never advanced past nonce {nonce}"))
    }
}

/// The output of a cli invocation that ran but exited unsuccessfully.
fn failed_output(error: &anyhow::Error) -> Option<&CommandOutput> {
    error
        .downcast_ref::<CommandError>()
        .and_then(CommandError::output)
}

fn captured_text(output: &CommandOutput) -> String {
    format!("{}{}", output.stdout_text(), output.stderr_text())
}

fn remember(latest: &Mutex<Option<String>>, text: String) {
    if let Ok(mut latest) = latest.lock() {
        *latest = Some(text);
    }
}

/// Whether a failed submission was the cli reporting a rejection rather than failing to run.
fn is_rejection(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<CommandError>(),
        Some(CommandError::NonZeroExit(_))
    )
}
