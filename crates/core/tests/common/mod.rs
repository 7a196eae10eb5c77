//! A stand-in for the node and its cli client.
//!
//! The fake cli is a shell script that keeps the chain state (nonce, receiver balance, known
//! receipts) in plain files next to it. A mock server answers the node's `query` call with the
//! nonce from the same state directory so both sides always agree.
//!
//! Failures are injected through marker files: `fail_<command>_<subcommand>` makes the cli exit
//! non-zero, `garble_<command>_<subcommand>` makes it print output of an unknown shape,
//! `receipt_misses` holds the number of receipt queries that report the receipt as missing,
//! `flaky_balance` holds the number of balance queries that fail after each transfer,
//! `credit_override` holds the amount a transfer credits instead of its value, `replay_accept`
//! makes transfers with an already used nonce succeed with the original output, and `rpc_error`
//! makes the query endpoint answer with a JSON-RPC error.

#![allow(dead_code)]

use std::{
    fs::Permissions,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use chain_it_config::Arguments;
use temp_dir::TempDir;
use wiremock::{Mock, MockServer, Request, ResponseTemplate, matchers::method};

pub const CLI_NAME: &str = "anntool";
pub const NODE_NAME: &str = "ann";
pub const INITIAL_BALANCE: u64 = 100;

const FAKE_CLI: &str = r#"#!/bin/sh
state="$(cd "$(dirname "$0")" && pwd)"

if [ -e "$state/fail_$1_$2" ]; then
    echo "Error: $1 $2 failed" >&2
    exit 1
fi
if [ -e "$state/garble_$1_$2" ]; then
    echo "unexpected output"
    exit 0
fi

nonce="$(cat "$state/nonce")"

advance_nonce() {
    if [ "$1" != "$nonce" ]; then
        echo "Error: invalid nonce $1, expected $nonce" >&2
        exit 1
    fi
    echo $((nonce + 1)) > "$state/nonce.tmp"
    mv "$state/nonce.tmp" "$state/nonce"
}

case "$1 $2" in
"tx send")
    if [ "${10}" != "$nonce" ] && [ -e "$state/replay_accept" ]; then
        echo "txHash:0xaa${10}"
        exit 0
    fi
    advance_nonce "${10}"
    credit="$8"
    if [ -e "$state/credit_override" ]; then
        credit="$(cat "$state/credit_override")"
    fi
    balance="$(cat "$state/balance")"
    echo $((balance + credit)) > "$state/balance"
    if [ -e "$state/flaky_balance" ]; then
        cp "$state/flaky_balance" "$state/balance_misses"
    fi
    echo "txHash:0xaa${10}"
    ;;
"evm create")
    advance_nonce "$8"
    echo "0xcc$nonce" >> "$state/receipts"
    echo "txHash:0xcc${nonce}contract address: 0x5fbdb2315678afecb367f032d93f642f64180aa3"
    ;;
"evm exist")
    echo "true"
    ;;
"evm execute")
    advance_nonce "$8"
    echo "0xee$nonce" >> "$state/receipts"
    echo "txHash:0xee$nonce"
    ;;
"evm read")
    echo "result: 42"
    ;;
"query balance")
    misses="$(cat "$state/balance_misses")"
    if [ "$misses" -gt 0 ]; then
        echo $((misses - 1)) > "$state/balance_misses"
        echo "Error: account state unavailable" >&2
        exit 1
    fi
    echo "balance: $(cat "$state/balance")"
    ;;
"query receipt")
    misses="$(cat "$state/receipt_misses")"
    if [ "$misses" -gt 0 ]; then
        echo $((misses - 1)) > "$state/receipt_misses"
        echo "Error: receipt $4 not found" >&2
        exit 1
    fi
    if grep -qx "$4" "$state/receipts"; then
        echo "receipt $4: status ok"
    else
        echo "Error: receipt $4 not found" >&2
        exit 1
    fi
    ;;
*)
    echo "Error: unknown command $*" >&2
    exit 2
    ;;
esac
"#;

pub struct Harness {
    /// Holds the fake executables and the chain state.
    pub state: TempDir,
    pub workdir: TempDir,
    pub endpoint: MockServer,
}

impl Harness {
    pub async fn new() -> Self {
        let state = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let endpoint = MockServer::start().await;
        mount_query_endpoint(&endpoint, state.path().to_path_buf()).await;

        let harness = Self {
            state,
            workdir,
            endpoint,
        };
        harness.set("nonce", "0");
        harness.set("balance", &INITIAL_BALANCE.to_string());
        harness.set("receipts", "");
        harness.set("receipt_misses", "0");
        harness.set("balance_misses", "0");
        harness.install_executable(CLI_NAME, FAKE_CLI);
        harness
    }

    /// Arguments pointing at the fake cli and query endpoint, with short settle timeouts.
    pub fn arguments(&self) -> Arguments {
        let mut arguments = Arguments::default();
        arguments.build_directory = self.state.path().to_path_buf();
        arguments.cli = CLI_NAME.into();
        arguments.node = NODE_NAME.into();
        arguments.node_args = Vec::new();
        arguments.query_endpoint = self.endpoint.uri();
        arguments.runtime_directory = Some(self.state.path().to_path_buf());
        arguments.contracts_directory = self.state.path().join("contract");
        arguments.working_directory = Some(self.workdir.path().to_path_buf());
        arguments.node_start_timeout = 5_000;
        arguments.settle_timeout = 2_000;
        arguments.settle_interval = 20;
        arguments
    }

    pub fn set(&self, name: &str, contents: &str) {
        std::fs::write(self.state.path().join(name), format!("{contents}\n")).unwrap();
    }

    /// The `query` parameter of the latest request the endpoint received.
    pub async fn last_query(&self) -> String {
        let requests = self.endpoint.received_requests().await.unwrap_or_default();
        let request = requests
            .last()
            .expect("the endpoint received no query")
            .body_json::<serde_json::Value>()
            .unwrap();
        request["params"][0].as_str().unwrap().to_owned()
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.state.path().join(name))
            .unwrap()
            .trim()
            .to_owned()
    }

    /// Installs a fake node that runs `script` with `sh`.
    pub fn install_node(&self, script: &str) {
        self.install_executable(NODE_NAME, &format!("#!/bin/sh\n{script}\n"));
    }

    fn install_executable(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.state.path().join(name);
        std::fs::write(&path, contents).unwrap();
        std::fs::set_permissions(&path, Permissions::from_mode(0o755)).unwrap();
        path
    }
}

/// Mounts the node's JSON-RPC `query` call on `server`, answering with the nonce held in the
/// state directory.
async fn mount_query_endpoint(server: &MockServer, state: PathBuf) {
    Mock::given(method("POST"))
        .respond_with(move |request: &Request| query_response(&state, request))
        .mount(server)
        .await;
}

fn query_response(state: &Path, request: &Request) -> ResponseTemplate {
    let request = request
        .body_json::<serde_json::Value>()
        .unwrap_or_default();

    let response = if state.join("rpc_error").exists() {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": null,
            "error": "unknown query type",
        })
    } else {
        let nonce = std::fs::read_to_string(state.join("nonce"))
            .ok()
            .and_then(|nonce| nonce.trim().parse::<u64>().ok())
            .unwrap_or(0);
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": [112, {
                "result": {
                    "code": 0,
                    "data": hex::encode(alloy::rlp::encode(nonce)),
                    "log": "",
                }
            }],
            "error": "",
        })
    };

    ResponseTemplate::new(200).set_body_json(response)
}
