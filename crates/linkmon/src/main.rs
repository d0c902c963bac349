use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use linkmon_core::{
    bootstrap::verify_channels,
    catalog,
    config::Config,
    pipeline::{EventPipeline, PipelineConfig, StopReason},
    ports::SessionBootstrap,
    store::LinkStore,
};
use linkmon_telegram::TelegramSession;

#[derive(Debug, Parser)]
#[command(name = "linkmon", version, about = "Watch Telegram channels for xRocket deep links")]
struct Cli {
    /// Log level (trace, debug, info, warning, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert a plain channel list into the chats JSON config
    ConvertChats {
        #[arg(long, default_value = "chats.txt")]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Convert a plain proxy list into the proxies JSON config
    ConvertProxies {
        #[arg(long, default_value = "proxies.txt")]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Connect and record deep links until interrupted
    Monitor {
        #[arg(long)]
        bot_token: Option<String>,
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        chats: Option<PathBuf>,
        #[arg(long)]
        proxies: Option<PathBuf>,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Print the most recently stored links
    Links {
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("linkmon: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = &cli.log_level {
        cfg.log_level = level.clone();
    }
    if let Some(file) = &cli.log_file {
        cfg.log_file = Some(file.clone());
    }

    if let Err(e) = linkmon_core::logging::init("linkmon", &cfg.log_level, cfg.log_file.as_deref()) {
        eprintln!("linkmon: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli.command, cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, mut cfg: Config) -> anyhow::Result<()> {
    match command {
        Command::ConvertChats { input, output } => {
            let output = output.unwrap_or(cfg.chats_file);
            let n = catalog::convert_chats(&input, &output)?;
            println!("{n} chats written to {}", output.display());
        }
        Command::ConvertProxies { input, output } => {
            let output = output.unwrap_or(cfg.proxies_file);
            let n = catalog::convert_proxies(&input, &output)?;
            println!("{n} proxies written to {}", output.display());
        }
        Command::Monitor {
            bot_token,
            db_path,
            chats,
            proxies,
            workers,
        } => {
            if let Some(token) = bot_token {
                cfg.telegram_bot_token = Some(token);
            }
            if let Some(path) = db_path {
                cfg.db_path = path;
            }
            if let Some(path) = chats {
                cfg.chats_file = path;
            }
            if let Some(path) = proxies {
                cfg.proxies_file = path;
            }
            if let Some(n) = workers {
                cfg.workers = n.clamp(1, 64);
            }
            monitor(cfg).await?;
        }
        Command::Links { db_path, limit } => {
            let path = db_path.unwrap_or(cfg.db_path);
            let store = LinkStore::open(&path)?;
            for link in store.recent(limit)? {
                println!(
                    "{}\t{}\t{}\t{}",
                    link.timestamp, link.channel_id, link.message_id, link.link
                );
            }
            store.close()?;
        }
    }
    Ok(())
}

async fn monitor(cfg: Config) -> anyhow::Result<()> {
    let token = cfg.require_token()?.to_string();

    let proxies = catalog::load_proxies(&cfg.proxies_file)?;
    let proxy = proxies.into_iter().next();
    if proxy.is_none() {
        info!("no proxy configured, connecting directly");
    }

    let store = LinkStore::open(&cfg.db_path)
        .with_context(|| format!("opening link store at {}", cfg.db_path.display()))?;
    let chats = catalog::load_chats(&cfg.chats_file)?;

    let session = TelegramSession::new(token, proxy);
    let conn = session.authenticate().await?;

    let mut pipeline = EventPipeline::new(Arc::new(store.clone()), PipelineConfig::from(&cfg));
    if chats.is_empty() {
        warn!("no chats configured, monitoring every chat the bot receives");
    } else {
        let reachable = verify_channels(&conn, &chats).await;
        if reachable.is_empty() {
            anyhow::bail!("none of the {} configured chats is reachable", chats.len());
        }
        pipeline = pipeline.with_allowlist(reachable.into_iter().map(|c| c.channel_id));
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            on_signal.cancel();
        }
    });

    let mut stream = conn.listen(cfg.queue_capacity);
    let report = pipeline.run(&mut stream, shutdown).await;
    stream.stop().await;
    let report = report?;

    match &report.stop {
        StopReason::Disconnected(reason) => {
            anyhow::bail!("connection lost: {reason}");
        }
        StopReason::StreamEnded | StopReason::Shutdown => {
            info!(links = report.links_stored, "monitor stopped");
        }
    }
    Ok(())
}
