//! Command line client for a Devex workspace runner.

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use devex_client::{
    ConnectionState, FileWorkspace, FsUpdate, Session, SessionConfig, TerminalHandle,
    TerminalStatus,
};
use log::debug;
use tokio::io::AsyncBufReadExt;

#[derive(Parser)]
#[command(name = "devex", version, about = "Talk to a Devex workspace runner")]
struct Cli {
    /// Workspace id to attach to.
    workspace: String,

    /// Runner host and port, e.g. localhost:8000.
    #[arg(long, env = "DEVEX_RUNNER_HOST")]
    host: Option<String>,

    /// Connect with wss:// instead of ws://.
    #[arg(long)]
    tls: bool,

    /// Path to a TOML session config file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a workspace directory.
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Print a workspace file.
    Cat { path: String },
    /// Overwrite a workspace file with a local file's content.
    Put {
        /// Workspace path to write.
        path: String,
        /// Local file to read.
        file: PathBuf,
    },
    /// Attach an interactive terminal.
    Shell,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(host) = cli.host {
        config.runner_host = host;
    }
    if cli.tls {
        config.use_tls = true;
    }

    debug!("connecting to {}", config.ws_url(&cli.workspace));
    let session = Session::connect(config, cli.workspace.clone());
    wait_until_open(&session).await?;

    match cli.command {
        Command::Ls { path } => {
            let files = FileWorkspace::new(session.clone());
            let entries = files
                .fetch_dir(&path)
                .await
                .with_context(|| format!("failed to list '{path}'"))?;
            for entry in entries {
                if entry.is_dir {
                    println!("{}/", entry.name);
                } else {
                    println!("{}", entry.name);
                }
            }
        }
        Command::Cat { path } => {
            let files = FileWorkspace::new(session.clone());
            let content = files
                .open(&path)
                .await
                .with_context(|| format!("failed to read '{path}'"))?;
            print!("{content}");
        }
        Command::Put { path, file } => {
            let next = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let files = FileWorkspace::new(session.clone());
            let mut updates = files.updates();
            files
                .open(&path)
                .await
                .with_context(|| format!("failed to open '{path}'"))?;
            if files.save(&next)? {
                loop {
                    let update = tokio::time::timeout(Duration::from_secs(10), updates.recv())
                        .await
                        .context("timed out waiting for save confirmation")??;
                    match update {
                        FsUpdate::FileSaved { .. } => break,
                        FsUpdate::Failed { op: "updateContent", error } => {
                            anyhow::bail!("save failed: {error}")
                        }
                        _ => {}
                    }
                }
            }
        }
        Command::Shell => run_shell(&session).await?,
    }

    session.close();
    Ok(())
}

async fn wait_until_open(session: &Session) -> anyhow::Result<()> {
    let mut state = session.state();
    let wait = async {
        while *state.borrow_and_update() != ConnectionState::Open {
            state.changed().await?;
        }
        Ok::<_, tokio::sync::watch::error::RecvError>(())
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .context("timed out connecting to the workspace runner")?
        .context("session closed while connecting")?;
    Ok(())
}

async fn run_shell(session: &std::sync::Arc<Session>) -> anyhow::Result<()> {
    let term = TerminalHandle::new(session.clone());
    let mut output = term.output();
    let mut status = term.status_updates();
    term.request()?;

    // Wait for the runner to hand us a pty.
    loop {
        let next = tokio::time::timeout(Duration::from_secs(10), status.recv())
            .await
            .context("timed out waiting for a terminal")??;
        match next {
            TerminalStatus::Connected => break,
            TerminalStatus::Error | TerminalStatus::Disconnected => {
                anyhow::bail!("terminal failed to start")
            }
            TerminalStatus::Connecting => {}
        }
    }

    tokio::spawn(async move {
        while let Ok(chunk) = output.recv().await {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        }
    });

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if term.status() != TerminalStatus::Connected {
            break;
        }
        term.input(&format!("{line}\n"))?;
    }
    term.close()?;
    Ok(())
}
