//! `relay translate`: offline envelope translation over JSON lines.

use anyhow::Result;
use clap::Args;
use relay_connector::ProtocolTranslator;
use relay_core::{CanonicalEvent, ConnectorError, ConnectorId, TransportMessage};
use relay_settings::RelaySettings;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct TranslateArgs {
    /// Read canonical events and emit transport frames instead.
    #[arg(long)]
    pub reverse: bool,
}

pub async fn run(settings: &RelaySettings, args: &TranslateArgs) -> Result<()> {
    let id = ConnectorId::parse(settings.connector.id.as_str())?;
    let translator = ProtocolTranslator::new(id, settings.connector.source.clone());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let (mut translated, mut rejected) = (0_u64, 0_u64);

    while let Some(line) = stdin.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match translate_line(&translator, &line, args.reverse) {
            Ok(mut out) => {
                out.push('\n');
                stdout.write_all(out.as_bytes()).await?;
                translated += 1;
            }
            Err(e) => {
                warn!(error = %e, "skipping line");
                rejected += 1;
            }
        }
    }
    stdout.flush().await?;
    info!(translated, rejected, "translation finished");
    Ok(())
}

fn translate_line(
    translator: &ProtocolTranslator,
    line: &str,
    reverse: bool,
) -> relay_core::Result<String> {
    if reverse {
        let event: CanonicalEvent = serde_json::from_str(line)
            .map_err(|e| ConnectorError::Translation(format!("invalid canonical event: {e}")))?;
        translator.to_transport(&event).to_frame()
    } else {
        let event = translator.frame_to_canonical(line)?;
        Ok(serde_json::to_string(&event)?)
    }
}
