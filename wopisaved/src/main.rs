use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use wopisaved::daemon::{DaemonConfig, DaemonRuntime};

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run { script: Option<PathBuf> },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut script = None;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--script" | "-s" => match args.next() {
                Some(path) => script = Some(PathBuf::from(path)),
                None => anyhow::bail!("--script requires a path"),
            },
            "--help" | "-h" => return Ok(CliMode::Help),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(CliMode::Run { script })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let script = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: wopisaved [--script <path>]");
            println!("  --script <path>   Replay client commands from a file instead of stdin");
            return Ok(());
        }
        CliMode::Run { script } => script,
    };

    // Reports go to stdout, logs to stderr.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wopisaved=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = DaemonConfig::from_env()?.with_script(script);
    let summary = DaemonRuntime::new(config).run().await?;
    if summary.data_loss {
        anyhow::bail!(
            "{} session(s) closed with unsaved modifications",
            summary
                .sessions
                .iter()
                .filter(|session| session.data_loss)
                .count()
                .max(1)
        );
    }
    Ok(())
}
