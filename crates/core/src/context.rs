use std::{path::Path, sync::Arc};

use alloy::primitives::Address;
use anyhow::{Context as _, Result};
use chain_it_common::types::Account;
use chain_it_config::{Arguments, ContractFixtures};
use chain_it_node::{
    NodeProcess,
    process::{ProbeFuture, ShutdownPolicy},
    resolve_executable,
};
use chain_it_node_interaction::{CommandRunner, NonceClient};

/// Everything the scenarios of one suite share.
///
/// The context is built once per suite and handed to every scenario by reference. Nothing in it
/// changes while the scenarios run; the only state that evolves during a run is owned by the node.
#[derive(Debug)]
pub struct TestContext {
    config: Arguments,
    sender: Account,
    receiver: Address,
    contracts: ContractFixtures,
    cli: CommandRunner,
    nonce_client: Arc<NonceClient>,
    node: Option<NodeProcess>,
}

impl TestContext {
    /// Resolves the node and cli executables, starts the node and waits until it answers nonce
    /// queries.
    ///
    /// Any error returned here is fatal for the whole suite.
    pub async fn start(config: Arguments) -> Result<Self> {
        let node_executable = resolve_executable(&config.node, &config.build_directory)
            .context("Cannot find the node executable")?;
        let mut context = Self::attach(config)?;

        match context.config.runtime_directory() {
            Some(directory) if directory.exists() => {
                tracing::info!(runtime = %directory.display(), "Using the node runtime directory")
            }
            Some(directory) => tracing::warn!(
                runtime = %directory.display(),
                "The node runtime directory does not exist, the node might not be initialized"
            ),
            None => tracing::warn!("Cannot determine the node runtime directory"),
        }

        let logs_directory = context.config.directory().to_path_buf();
        std::fs::create_dir_all(&logs_directory).with_context(|| {
            format!(
                "Failed to create the working directory {}",
                logs_directory.display()
            )
        })?;

        let shutdown_policy = if context.config.keep_node_running {
            ShutdownPolicy::LeaveRunning
        } else {
            ShutdownPolicy::Kill
        };
        let nonce_client = context.nonce_client.clone();
        let address = context.sender.address;

        let node = NodeProcess::start(
            &node_executable,
            &context.config.node_args,
            &logs_directory,
            context.config.node_start_timeout(),
            shutdown_policy,
            move || -> ProbeFuture {
                let nonce_client = nonce_client.clone();
                Box::pin(async move { nonce_client.get_nonce(address).await.map(|_| ()) })
            },
        )
        .await?;

        context.node = Some(node);
        Ok(context)
    }

    /// Builds a context for a node that is already running and reachable at the configured query
    /// endpoint. Only the cli executable is resolved.
    pub fn attach(config: Arguments) -> Result<Self> {
        let cli_executable = resolve_executable(&config.cli, &config.build_directory)
            .context("Cannot find the cli executable")?;
        tracing::info!(cli = %cli_executable.display(), "Resolved the cli executable");

        Ok(Self {
            sender: config.sender()?,
            receiver: config.receiver()?,
            contracts: config.contract_fixtures(),
            cli: CommandRunner::new(cli_executable),
            nonce_client: Arc::new(NonceClient::new(config.query_endpoint.clone())),
            node: None,
            config,
        })
    }

    pub fn config(&self) -> &Arguments {
        &self.config
    }

    pub fn sender(&self) -> &Account {
        &self.sender
    }

    pub fn receiver(&self) -> Address {
        self.receiver
    }

    pub fn contracts(&self) -> &ContractFixtures {
        &self.contracts
    }

    pub fn cli(&self) -> &CommandRunner {
        &self.cli
    }

    pub fn nonce_client(&self) -> &NonceClient {
        &self.nonce_client
    }

    /// The process id of the node, if this context started one.
    pub fn node_id(&self) -> Option<u32> {
        self.node.as_ref().map(NodeProcess::id)
    }

    pub fn working_directory(&self) -> &Path {
        self.config.directory()
    }

    /// Fails if the node this context started has exited.
    pub fn ensure_node_running(&mut self) -> Result<()> {
        match self.node.as_mut() {
            Some(node) => node.ensure_running(),
            None => Ok(()),
        }
    }
}
