//! Command line surface and console rendering.

use clap::{Parser, Subcommand};
use crossterm::style::Stylize;
use serde_json::Value;

use crate::flow::{FlowReport, FlowRequest, Outcome};
use crate::identity::AgentRecord;

#[derive(Parser, Debug)]
#[command(
    name = "tee-verifier",
    version,
    about = "Verify TEE agent responses against the on-chain registry"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Call an agent endpoint and verify the signed response.
    Verify {
        #[arg(long, default_value_t = 0)]
        agent_id: u64,
        /// Endpoint path, e.g. `/hello_world`.
        #[arg(long, default_value = "")]
        url_path: String,
        /// JSON request body. Sent with POST when present, otherwise GET.
        #[arg(long)]
        data: Option<String>,
    },

    /// Send a chat message and verify the reply.
    Chat {
        #[arg(long, default_value_t = 0)]
        agent_id: u64,
        #[arg(long)]
        message: String,
    },

    /// Send a chat message encrypted to the agent's registered key.
    PrivacyChat {
        #[arg(long, default_value_t = 0)]
        agent_id: u64,
        #[arg(long)]
        message: String,
    },

    /// Verify a response body obtained elsewhere.
    VerifyResponse {
        #[arg(long, default_value_t = 0)]
        agent_id: u64,
        /// Raw `{"data": ..., "sig": ...}` body.
        #[arg(long)]
        response_data: String,
    },

    /// Show the on-chain record of an agent.
    Agent {
        #[arg(long, default_value_t = 0)]
        agent_id: u64,
    },

    /// Show the number of registered agents.
    Count,

    /// Show the ZK verifier address of a key-anchored registry.
    ZkVerifier,
}

impl Command {
    /// The agent id and flow request for verifying subcommands.
    pub fn flow_request(&self) -> Result<Option<(u64, FlowRequest)>, String> {
        let request = match self {
            Command::Verify {
                agent_id,
                url_path,
                data,
            } => {
                let body = match data.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
                    Some(data) => Some(
                        serde_json::from_str::<Value>(data)
                            .map_err(|e| format!("--data is not valid JSON: {e}"))?,
                    ),
                    None => None,
                };
                (
                    *agent_id,
                    FlowRequest::Endpoint {
                        path: url_path.clone(),
                        body,
                    },
                )
            }
            Command::Chat { agent_id, message } => (
                *agent_id,
                FlowRequest::Chat {
                    message: message.clone(),
                },
            ),
            Command::PrivacyChat { agent_id, message } => (
                *agent_id,
                FlowRequest::PrivacyChat {
                    message: message.clone(),
                },
            ),
            Command::VerifyResponse {
                agent_id,
                response_data,
            } => (
                *agent_id,
                FlowRequest::Offline {
                    response: response_data.clone(),
                },
            ),
            Command::Agent { .. } | Command::Count | Command::ZkVerifier => return Ok(None),
        };
        Ok(Some(request))
    }
}

pub fn banner(title: &str, subtitle: &str) {
    let line = "-".repeat(70);
    println!("{}", line.as_str().dim());
    println!("{}", format!("➤ {title}").cyan().bold());
    if !subtitle.is_empty() {
        println!("{}", subtitle.dim());
    }
    println!("{}", line.as_str().dim());
}

pub fn kv(key: &str, value: &str) {
    println!("  {} {}", format!("{key}:").dim(), value.blue());
}

pub fn print_record(record: &AgentRecord) {
    let json = record.to_json();
    for key in [
        "agent_id",
        "scheme",
        "owner",
        "agent_wallet_address",
        "public_key",
        "agent_url",
    ] {
        if let Some(value) = json.get(key) {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            kv(key, &text);
        }
    }
    println!(
        "\n{}\n{}\n",
        "Full agent record:".dim(),
        serde_json::to_string_pretty(&json).unwrap_or_default()
    );
}

/// Print the staged progress of a finished run.
pub fn print_report(report: &FlowReport) {
    banner(
        "Step 1/3: Query agent on-chain",
        "Fetching agent data from registry",
    );
    match &report.record {
        Some(record) => {
            print_record(record);
            println!("{}\n", "✓ Agent loaded from chain".green());
        }
        None => return print_outcome(report),
    }

    banner(
        "Step 2/3: Query agent endpoint",
        "Requesting data from the agent service",
    );
    match &report.dispatch {
        Some(dispatch) => {
            kv("method", dispatch.method.as_str());
            kv("url", dispatch.url.as_str());
            if let Some(envelope) = &dispatch.envelope {
                kv("encrypted", &envelope.is_encrypted().to_string());
            }
            if let Some(status) = dispatch.http_status {
                kv("http_status", &status.to_string());
            }
        }
        None if report.trace.contains(&crate::flow::FlowState::Dispatch) => {}
        None => kv("mode", "offline (response supplied by caller)"),
    }
    if let Some(response) = &report.response {
        let pretty = serde_json::to_string_pretty(&response.payload()).unwrap_or_default();
        println!("\n{}\n{}\n", "agent response data:".dim(), pretty);
        kv("sig", response.sig());
        println!();
    }

    if report.response.is_some() {
        banner(
            "Step 3/3: Verify signature",
            "Checking the registered identity against the response signature",
        );
    }
    print_outcome(report);
}

fn print_outcome(report: &FlowReport) {
    let identity = report
        .record
        .as_ref()
        .map(|r| match r {
            AgentRecord::WalletAnchored(a) => a.wallet_address.to_string(),
            AgentRecord::KeyAnchored(_) => "registered public key".to_string(),
        })
        .unwrap_or_default();

    match &report.outcome {
        Outcome::Verified => println!(
            "{} ({})",
            "✓ Signature verified".green().bold(),
            identity
        ),
        Outcome::Rejected => println!(
            "{} ({})",
            "✗ REJECTED: signature does not match the registered identity"
                .red()
                .bold(),
            identity
        ),
        Outcome::Failed { state, error } => println!(
            "{} in {}: [{}] {}",
            "✗ FAILED".yellow().bold(),
            state,
            error.kind(),
            error
        ),
    }
    kv("run_id", &report.run_id.to_string());
}
