//! Command handlers for the SBMS CLI

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sbms_core::protocol::{decode_all, encode, generate_with};
use sbms_core::{CorrelationId, MonotonicTimeSource, ObexReceiver, Priority, Record, RecordKind, StatusCode};
use sbms_runtime::{
    run_ingestion, spawn_sweeper, ChannelInbox, DirectoryInbox, InMemoryHistory, IngestionSource, JsonFileHistory,
    MergedSource, MessageHistory, RelayOrchestrator, SendPrimitive,
};

use crate::cli::{Commands, DigestArg, EncodeCommand};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::sender::{CommandSender, DryRunSender, NoGateway};
use crate::transport::{inbox_sink, spawn_listener, TcpTransport};

type Relay = RelayOrchestrator<MonotonicTimeSource>;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command against the loaded configuration
    pub async fn execute(command: Commands, config: AppConfig) -> Result<()> {
        match command {
            Commands::Relay { .. } => Self::handle_relay_command(config).await,
            Commands::Send {
                to,
                text,
                priority,
                no_wait,
                ..
            } => Self::handle_send_command(config, &to, &text, priority.into(), no_wait).await,
            Commands::Encode { record } => {
                let bytes = Self::encode_record(record, &config)?;
                std::io::stdout().write_all(&bytes)?;
                Ok(())
            }
            Commands::Decode { input } => {
                let json = Self::decode_to_json(&read_input(&input)?)?;
                println!("{}", json);
                Ok(())
            }
            Commands::Uuid {
                to,
                text,
                timestamp,
                digest,
            } => {
                let id = Self::correlation_id(&config, &to, &text, timestamp, digest);
                println!("{}", id);
                Ok(())
            }
            Commands::Config => {
                print!("{}", AppConfig::example_config());
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Relay
    // ------------------------------------------------------------------------

    async fn handle_relay_command(config: AppConfig) -> Result<()> {
        let sender: Arc<dyn SendPrimitive> = if config.gateway.dry_run {
            Arc::new(DryRunSender)
        } else if config.gateway.send_command.is_empty() {
            return Err(CliError::Input(
                "no gateway.send_command configured (use --dry-run to only log messages)".to_string(),
            ));
        } else {
            Arc::new(CommandSender::from_template(&config.gateway.send_command)?)
        };

        let relay = Self::build_orchestrator(&config, sender)?;
        let sweeper = spawn_sweeper(relay.clone(), config.core.correlation.sweep_interval());

        let (tx, inbox) = ChannelInbox::new();
        let receiver = ObexReceiver::new(config.core.session.max_packet_len, inbox_sink(tx));
        let (_, listener) = spawn_listener(&config.link.listen, receiver).await?;

        // One ingestion loop, so units from both sources are handled one at a time
        let mut source: Box<dyn IngestionSource> = match &config.storage.inbox_dir {
            Some(dir) => {
                info!("Watching {} for pushed messages", dir.display());
                let folder = DirectoryInbox::watch(dir, config.storage.inbox_poll_interval());
                Box::new(MergedSource::new(inbox, folder))
            }
            None => Box::new(inbox),
        };

        info!("Relaying to peer tcp://{}; press Ctrl-C to stop", config.link.peer);
        tokio::select! {
            _ = run_ingestion(&mut *source, &*relay) => warn!("Inbound sources closed"),
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("Could not wait for Ctrl-C: {}", err);
                }
            }
        }

        shutdown([Some(sweeper), Some(listener)]);
        let stats = relay.stats();
        info!("Relay stopped: {:?}", stats);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------------

    async fn handle_send_command(
        config: AppConfig,
        to: &str,
        text: &str,
        priority: Priority,
        no_wait: bool,
    ) -> Result<()> {
        let relay = Self::build_orchestrator(&config, Arc::new(NoGateway))?;

        // Listen before pushing so a quick status is not missed
        let (tx, mut inbox) = ChannelInbox::new();
        let listener = if no_wait {
            drop(tx);
            None
        } else {
            let receiver = ObexReceiver::new(config.core.session.max_packet_len, inbox_sink(tx));
            Some(spawn_listener(&config.link.listen, receiver).await?.1)
        };

        let id = relay.originate_with(to, text, priority).await?;
        println!("{}", id);
        if no_wait {
            return Ok(());
        }

        let waited_ms = config.core.correlation.expiry_timeout_ms;
        let outcome = tokio::time::timeout(
            config.core.correlation.expiry_timeout(),
            wait_for_status(&mut inbox, &relay, &id),
        )
        .await;
        shutdown([listener]);

        match outcome {
            Ok(Some(status)) => {
                println!("{}", status);
                Ok(())
            }
            Ok(None) => Err(CliError::Input("status listener closed".to_string())),
            Err(_) => {
                relay.sweep();
                Err(CliError::StatusTimeout {
                    id: id.to_string(),
                    waited_ms,
                })
            }
        }
    }

    // ------------------------------------------------------------------------
    // Offline Helpers
    // ------------------------------------------------------------------------

    /// Wire bytes of the record described on the command line
    pub fn encode_record(record: EncodeCommand, config: &AppConfig) -> Result<Vec<u8>> {
        let now = Utc::now();
        let record = match record {
            EncodeCommand::Request { to, text, id, priority } => {
                let id = match id {
                    Some(raw) => CorrelationId::parse(&raw)?,
                    None => generate_with(config.core.correlation.id_digest, &to, &text, now.timestamp()),
                };
                Record::request(&to, &text, &id, priority.into(), now)
            }
            EncodeCommand::Status { id, status } => {
                Record::status_response(&CorrelationId::parse(&id)?, StatusCode::from(status), now)
            }
        };
        Ok(encode(&record))
    }

    /// Pretty JSON array with the kind and fields of every record in `bytes`
    pub fn decode_to_json(bytes: &[u8]) -> Result<String> {
        let records: Vec<serde_json::Value> = decode_all(bytes)?
            .iter()
            .map(|record| {
                serde_json::json!({
                    "kind": kind_name(record.kind()),
                    "fields": record.fields(),
                })
            })
            .collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    pub fn correlation_id(
        config: &AppConfig,
        to: &str,
        text: &str,
        timestamp: Option<i64>,
        digest: Option<DigestArg>,
    ) -> CorrelationId {
        let digest = digest.map(Into::into).unwrap_or(config.core.correlation.id_digest);
        let secs = timestamp.unwrap_or_else(|| Utc::now().timestamp());
        generate_with(digest, to, text, secs)
    }

    fn build_orchestrator(config: &AppConfig, sender: Arc<dyn SendPrimitive>) -> Result<Arc<Relay>> {
        let transport = Arc::new(TcpTransport::new(config.link.peer.clone(), config.link.connect_timeout()));
        let history: Arc<dyn MessageHistory> = match &config.storage.history_file {
            Some(path) => Arc::new(JsonFileHistory::open(path)?),
            None => Arc::new(InMemoryHistory::new()),
        };

        let relay = RelayOrchestrator::new(config.core.clone(), MonotonicTimeSource::new(), sender, transport)
            .with_history(history);
        Ok(Arc::new(relay))
    }
}

/// Process inbound units until the status for `id` arrives
async fn wait_for_status<S>(inbox: &mut S, relay: &Relay, id: &CorrelationId) -> Option<StatusCode>
where
    S: IngestionSource,
{
    while let Some(unit) = inbox.next_unit().await {
        let outcome = relay.on_inbound_bytes(&unit.bytes).await;
        if let Err(err) = inbox.acknowledge(&unit).await {
            warn!("Failed to acknowledge unit from {}: {}", unit.origin, err);
        }
        if let sbms_runtime::InboundOutcome::StatusMatched { id: matched, status } = outcome {
            if &matched == id {
                return Some(status.unwrap_or(StatusCode::Failed));
            }
        }
    }
    None
}

fn shutdown<const N: usize>(tasks: [Option<JoinHandle<()>>; N]) {
    for task in tasks.into_iter().flatten() {
        task.abort();
    }
}

fn kind_name(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Request => "request",
        RecordKind::StatusResponse => "status",
        RecordKind::Unknown => "unknown",
    }
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    if path == Path::new("-") {
        std::io::stdin().read_to_end(&mut bytes).context("reading stdin")?;
    } else {
        bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    }
    Ok(bytes)
}
