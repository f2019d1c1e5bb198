use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wopi_core::WopiClient;

use crate::commands::{ClientCommand, KeyEventKind};
use crate::document::TextDocument;
use crate::save::{
    ModificationOrigin, SaveConfig, SessionHandle, SessionRegistry, SessionReport, SessionSummary,
};

#[derive(Clone, Debug, Default)]
pub struct DaemonConfig {
    pub save: SaveConfig,
    /// Used when a `load url=` carries no `access_token` of its own.
    pub access_token: Option<String>,
    /// Command script; stdin when unset.
    pub script: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            save: SaveConfig::from_env(),
            access_token: read_optional_env("WOPI_ACCESS_TOKEN"),
            script: None,
        })
    }

    pub fn with_script(mut self, script: Option<PathBuf>) -> Self {
        self.script = script;
        self
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub sessions: Vec<SessionSummary>,
    pub reports: usize,
    pub data_loss: bool,
}

struct LoadedDocument {
    doc_key: String,
    document: Arc<TextDocument>,
    handle: SessionHandle,
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    registry: SessionRegistry,
    reports_rx: mpsc::UnboundedReceiver<SessionReport>,
}

impl DaemonRuntime {
    pub fn new(config: DaemonConfig) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new(config.save.clone(), reports_tx);
        Self {
            config,
            registry,
            reports_rx,
        }
    }

    /// Replays the configured script (or stdin), printing reports to stdout.
    pub async fn run(self) -> anyhow::Result<RunSummary> {
        match self.config.script.clone() {
            Some(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("failed to open script {}", path.display()))?;
                self.run_with(tokio::io::BufReader::new(file), tokio::io::stdout())
                    .await
            }
            None => {
                self.run_with(
                    tokio::io::BufReader::new(tokio::io::stdin()),
                    tokio::io::stdout(),
                )
                .await
            }
        }
    }

    pub async fn run_with<R, W>(self, input: R, output: W) -> anyhow::Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let DaemonRuntime {
            config,
            registry,
            reports_rx,
        } = self;
        info!(
            max_retries = config.save.max_retries,
            upload_timeout_secs = config.save.upload_timeout.as_secs(),
            autosave = ?config.save.autosave_interval,
            "wopisaved started"
        );

        let printer = spawn_report_printer(reports_rx, output);
        let mut current: Option<LoadedDocument> = None;
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await.context("failed to read command")? {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match ClientCommand::parse(line) {
                Ok(command) => {
                    execute(&config, &registry, &mut current, command).await;
                }
                Err(err) => warn!("ignoring command `{line}`: {err}"),
            }
            for summary in registry.reap_finished().await {
                debug!(doc_key = %summary.doc_key, data_loss = summary.data_loss, "session removed");
            }
        }

        info!(open = registry.len().await, "input finished, closing sessions");
        let sessions = registry.shutdown_all().await;
        drop(registry);
        let (reports, printed_loss) = printer
            .await
            .context("report printer stopped abnormally")??;

        let data_loss = printed_loss || sessions.iter().any(|summary| summary.data_loss);
        Ok(RunSummary {
            sessions,
            reports,
            data_loss,
        })
    }
}

async fn execute(
    config: &DaemonConfig,
    registry: &SessionRegistry,
    current: &mut Option<LoadedDocument>,
    command: ClientCommand,
) {
    if let ClientCommand::Load { url } = &command {
        match load_document(config, registry, url).await {
            Ok(loaded) => *current = Some(loaded),
            Err(err) => {
                error!("load failed: {err:#}");
                *current = None;
            }
        }
        return;
    }

    let Some(loaded) = current.as_ref() else {
        warn!(?command, "no document loaded");
        return;
    };
    let sent = match command {
        ClientCommand::Key {
            kind: KeyEventKind::Up,
            ..
        } => Ok(()),
        ClientCommand::Key {
            kind: KeyEventKind::Input,
            char_code,
            key_code,
        } => {
            if loaded.document.apply_input(char_code, key_code) {
                loaded.handle.modified(ModificationOrigin::User)
            } else {
                Ok(())
            }
        }
        ClientCommand::Save {
            dont_terminate_edit,
            request,
        } => {
            debug!(doc_key = %loaded.doc_key, dont_terminate_edit, "save requested");
            loaded.handle.save(request)
        }
        ClientCommand::Autosave => loaded.handle.autosave(),
        ClientCommand::Close => {
            let result = loaded.handle.disconnect();
            *current = None;
            result
        }
        ClientCommand::Load { .. } => Ok(()),
    };
    if let Err(err) = sent {
        warn!("{err}");
    }
}

async fn load_document(
    config: &DaemonConfig,
    registry: &SessionRegistry,
    url: &str,
) -> anyhow::Result<LoadedDocument> {
    let client = WopiClient::from_load_url(url, config.access_token.as_deref())
        .context("invalid load url")?;
    let doc_key = client.document_key();
    let info = client
        .check_file_info()
        .await
        .with_context(|| format!("CheckFileInfo failed for {doc_key}"))?;
    let content = client
        .get_file()
        .await
        .with_context(|| format!("GetFile failed for {doc_key}"))?;
    if !info.user_can_write {
        warn!(doc_key = %doc_key, "storage reports the document as read-only");
    }

    let document = Arc::new(TextDocument::from_bytes(&content));
    let handle = registry
        .open(&doc_key, Arc::clone(&document), Arc::new(client))
        .await?;
    info!(
        doc_key = %doc_key,
        file = %info.base_file_name,
        bytes = content.len(),
        "document loaded"
    );
    Ok(LoadedDocument {
        doc_key,
        document,
        handle,
    })
}

fn spawn_report_printer<W>(
    mut reports: mpsc::UnboundedReceiver<SessionReport>,
    mut output: W,
) -> JoinHandle<anyhow::Result<(usize, bool)>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut count = 0;
        let mut data_loss = false;
        while let Some(report) = reports.recv().await {
            if let SessionReport::Closed { data_loss: true, .. } = &report {
                data_loss = true;
            }
            output
                .write_all(report_line(&report)?.as_bytes())
                .await
                .context("failed to write report")?;
            output.flush().await.context("failed to flush report")?;
            count += 1;
        }
        Ok((count, data_loss))
    })
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
