//! `relay listen`: bridge a WebSocket endpoint to stdin/stdout.
//!
//! Inbound events are printed as canonical-event JSON lines. Each stdin line
//! is parsed as a transport message and sent. On EOF, Ctrl-C, or a lost
//! connection the final status is printed to stderr.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Args;
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_connector::{Connector, SubscriptionFilter};
use relay_core::TransportMessage;
use relay_settings::RelaySettings;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Endpoint to connect to (defaults to `connector.url` from settings).
    #[arg(long)]
    pub url: Option<String>,

    /// Only print events of this type. Repeatable.
    #[arg(long = "type", value_name = "EVENT_TYPE")]
    pub types: Vec<String>,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

pub async fn run(settings: &RelaySettings, args: ListenArgs) -> Result<()> {
    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install metrics exporter")?;
        info!(%addr, "prometheus exporter listening");
    }

    let url = args
        .url
        .or_else(|| settings.connector.url.clone())
        .context("No endpoint: pass --url or set connector.url in settings")?;

    let connector = Connector::from_settings(settings)?;
    let filter = args
        .types
        .into_iter()
        .fold(SubscriptionFilter::all(), SubscriptionFilter::event_type);
    let (_subscription, mut events) = connector.subscribe_channel(filter).await?;

    connector
        .connect(&url)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                let mut line = serde_json::to_vec(&event)?;
                line.push(b'\n');
                stdout.write_all(&line).await?;
                stdout.flush().await?;
            }
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match TransportMessage::parse(&line) {
                    Ok(message) => {
                        if let Err(e) = connector.send(message).await {
                            warn!(code = e.code(), error = %e, "send failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "ignoring malformed input line"),
                }
            }
            lost = connector.connection_lost() => {
                warn!(error = %lost, "connection lost");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    connector.disconnect().await?;
    let status = connector.status().await?;
    eprintln!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
