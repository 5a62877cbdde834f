//! Send primitives for the host
//!
//! `CommandSender` hands each message to an external program (an SMS gateway
//! client, a modem tool). `DryRunSender` only logs. `NoGateway` serves hosts
//! that only originate messages.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use sbms_core::SendOutcome;
use sbms_runtime::SendPrimitive;

use crate::error::{CliError, Result};

pub const TO_PLACEHOLDER: &str = "{to}";
pub const TEXT_PLACEHOLDER: &str = "{text}";

/// Runs a program per message; exit status zero means sent
#[derive(Debug, Clone)]
pub struct CommandSender {
    program: String,
    args: Vec<String>,
}

impl CommandSender {
    /// Build from `program arg...`, where arguments may hold placeholders
    pub fn from_template(template: &[String]) -> Result<Self> {
        let (program, args) = template
            .split_first()
            .ok_or_else(|| CliError::Input("gateway.send_command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Arguments with placeholders substituted
    pub fn render_args(&self, address: &str, text: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(TO_PLACEHOLDER, address).replace(TEXT_PLACEHOLDER, text))
            .collect()
    }
}

#[async_trait]
impl SendPrimitive for CommandSender {
    async fn send(&self, address: &str, text: &str) -> SendOutcome {
        let output = Command::new(&self.program)
            .args(self.render_args(address, text))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The orchestrator's send timeout drops this future
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                debug!("{} sent message to {}", self.program, address);
                SendOutcome::Sent
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let reason = match stderr.trim() {
                    "" => format!("{} exited with {}", self.program, output.status),
                    detail => format!("{} exited with {}: {}", self.program, output.status, detail),
                };
                warn!("Send to {} failed: {}", address, reason);
                SendOutcome::failed(reason)
            }
            Err(err) => {
                warn!("Could not run {}: {}", self.program, err);
                SendOutcome::failed(format!("could not run {}: {}", self.program, err))
            }
        }
    }
}

/// Logs every message and reports it as sent
#[derive(Debug, Clone, Default)]
pub struct DryRunSender;

#[async_trait]
impl SendPrimitive for DryRunSender {
    async fn send(&self, address: &str, text: &str) -> SendOutcome {
        info!("[dry run] to {}: {}", address, text);
        SendOutcome::Sent
    }
}

/// Fails every message; for hosts without cellular access
#[derive(Debug, Clone, Default)]
pub struct NoGateway;

#[async_trait]
impl SendPrimitive for NoGateway {
    async fn send(&self, address: &str, _text: &str) -> SendOutcome {
        warn!("Refusing to relay to {}: no gateway on this host", address);
        SendOutcome::failed("no gateway on this host")
    }
}
