use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytesize::ByteSize;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use vidqueue_core::impls::BroadcastEventSink;
use vidqueue_core::{
    ItemId, ItemStatus, ManagerHandle, MediaFile, QueueEvent, TransferOutcome, UploadError,
    UploaderBuilder, UploaderConfig, WorkItem,
};

#[derive(Parser)]
#[command(name = "vidqueue", version)]
#[command(about = "Upload videos one at a time, in the order they were added")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue files and upload them sequentially.
    ///
    /// Exits non-zero if any file was rejected, unreadable, or failed.
    Upload {
        #[command(flatten)]
        destination: Destination,

        /// Hold each item in `processing` until reported done (interactive `done`/`fail`).
        #[arg(long)]
        await_processing: bool,

        /// Keep a prompt open to list, add, retry and remove items.
        #[arg(long, short)]
        interactive: bool,

        #[arg(required_unless_present = "interactive")]
        files: Vec<PathBuf>,
    },

    /// Validate and print the resolved configuration.
    CheckConfig {
        #[command(flatten)]
        destination: Destination,
    },
}

#[derive(Args)]
struct Destination {
    /// TOML config file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Overrides `endpoint` from the config file.
    #[arg(long)]
    endpoint: Option<String>,

    /// Overrides `channel_id` from the config file.
    #[arg(long)]
    channel: Option<String>,
}

impl Destination {
    fn resolve(&self) -> Result<UploaderConfig> {
        let mut config = match &self.config {
            Some(path) => UploaderConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => UploaderConfig::new(String::new(), String::new()),
        };
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(channel) = &self.channel {
            config.channel_id = channel.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Upload {
            destination,
            await_processing,
            interactive,
            files,
        } => {
            let mut config = destination.resolve()?;
            config.await_processing |= await_processing;
            upload(config, files, interactive).await
        }
        Commands::CheckConfig { destination } => {
            let config = destination.resolve()?;
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn upload(config: UploaderConfig, paths: Vec<PathBuf>, interactive: bool) -> Result<ExitCode> {
    let sink = Arc::new(BroadcastEventSink::default());
    let printer = tokio::spawn(print_events(sink.subscribe()));

    let manager = UploaderBuilder::new(config).event_sink(sink).build()?;
    let handle = manager.handle();

    let mut tally = Tally::default();
    for path in &paths {
        if let Err(err) = tally.add(&handle, path).await {
            eprintln!("skipping {}: {err:#}", path.display());
        }
    }

    if interactive {
        prompt(&handle, BufReader::new(tokio::io::stdin()), &mut tally).await?;
    }

    let items = handle.wait_until_idle().await?;
    manager.shutdown().await;
    // the sink is gone with the manager, so the printer drains and stops
    if let Err(err) = printer.await {
        debug!(error = %err, "event printer ended abnormally");
    }

    let failed = summarize(&items, tally.not_queued());
    if failed > 0 || tally.not_queued() > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Files that never made it into the queue, from the command line and the prompt.
#[derive(Debug, Default)]
struct Tally {
    rejected: usize,
    skipped: usize,
}

impl Tally {
    /// Enqueue one path. Every error is counted before it is returned.
    async fn add(&mut self, handle: &ManagerHandle, path: &Path) -> Result<()> {
        let file = match MediaFile::from_path(path).await {
            Ok(file) => file,
            Err(err) => {
                self.skipped += 1;
                return Err(err).with_context(|| format!("cannot open {}", path.display()));
            }
        };
        match handle.enqueue_one(file).await {
            Ok(_) => Ok(()),
            Err(err @ UploadError::Validation(_)) => {
                // already printed by the event printer
                self.rejected += 1;
                debug!(error = %err, "file refused");
                Ok(())
            }
            Err(err) => {
                self.skipped += 1;
                Err(err.into())
            }
        }
    }

    fn not_queued(&self) -> usize {
        self.rejected + self.skipped
    }
}

async fn print_events(mut events: broadcast::Receiver<QueueEvent>) {
    let mut names: HashMap<ItemId, String> = HashMap::new();
    let mut shown: HashMap<ItemId, u8> = HashMap::new();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!(skipped = n, "event printer lagging");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match &event {
            QueueEvent::Enqueued { id, name: file } => {
                names.insert(*id, file.clone());
                println!("queued     {file} ({id})");
            }
            QueueEvent::Rejected { reason, .. } => println!("rejected   {reason}"),
            QueueEvent::Started { id, attempt } => {
                shown.insert(*id, 0);
                match attempt {
                    1 => println!("uploading  {}", label(&names, id)),
                    n => println!("uploading  {} (attempt {n})", label(&names, id)),
                }
            }
            QueueEvent::Progress { id, percent } => {
                // one line per 10%
                let last = shown.entry(*id).or_insert(0);
                if percent / 10 > *last / 10 {
                    *last = *percent;
                    println!("           {} {percent}%", label(&names, id));
                }
            }
            QueueEvent::Processing { id } => println!("processing {}", label(&names, id)),
            QueueEvent::Completed { id } => println!("done       {}", label(&names, id)),
            QueueEvent::Failed { id, detail } => println!("failed     {}: {detail}", label(&names, id)),
            QueueEvent::Retried { id } => println!("retrying   {}", label(&names, id)),
            QueueEvent::Removed { id } => println!("removed    {}", label(&names, id)),
            QueueEvent::Idle => {}
        }
    }
}

fn label(names: &HashMap<ItemId, String>, id: &ItemId) -> String {
    names.get(id).cloned().unwrap_or_else(|| id.to_string())
}

const HELP: &str = "\
commands:
  list                 show the queue
  add <path>           queue another file
  retry <id>           requeue a failed item
  remove <id>          drop an item that is not uploading
  done <id>            server-side processing finished
  fail <id> <message>  server-side processing failed
  quit                 stop prompting and wait for the queue to drain";

async fn prompt<R>(handle: &ManagerHandle, input: R, tally: &mut Tally) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    println!("{HELP}");
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let arg = words.next();
        let rest = words.collect::<Vec<_>>().join(" ");

        let result = match (command, arg) {
            ("quit" | "exit" | "q", _) => break,
            ("help" | "?", _) => {
                println!("{HELP}");
                Ok(())
            }
            ("list" | "ls", _) => list(handle).await,
            ("add", Some(path)) => tally.add(handle, Path::new(path)).await,
            ("retry", Some(id)) => retry(handle, id).await,
            ("remove" | "rm", Some(id)) => remove(handle, id).await,
            ("done", Some(id)) => finish(handle, id, TransferOutcome::success()).await,
            ("fail", Some(id)) => finish(handle, id, TransferOutcome::rejected(rest)).await,
            _ => Err(anyhow::anyhow!("unknown command '{}', try 'help'", line.trim())),
        };
        if let Err(err) = result {
            println!("error: {err:#}");
        }
    }
    Ok(())
}

async fn list(handle: &ManagerHandle) -> Result<()> {
    let items = handle.list().await?;
    if items.is_empty() {
        println!("queue is empty");
    }
    for item in &items {
        println!("{}", describe(item));
    }
    Ok(())
}

async fn retry(handle: &ManagerHandle, id: &str) -> Result<()> {
    handle.retry(parse_id(id)?).await?;
    Ok(())
}

async fn remove(handle: &ManagerHandle, id: &str) -> Result<()> {
    handle.remove(parse_id(id)?).await?;
    Ok(())
}

async fn finish(handle: &ManagerHandle, id: &str, outcome: TransferOutcome) -> Result<()> {
    handle.finish_processing(parse_id(id)?, outcome).await?;
    Ok(())
}

fn parse_id(raw: &str) -> Result<ItemId> {
    if raw.trim().is_empty() {
        bail!("missing item id");
    }
    Ok(raw.parse()?)
}

fn describe(item: &WorkItem) -> String {
    let mut line = format!(
        "{}  {:<10}  {:>9}  {}  [{}]",
        item.id(),
        item.status(),
        ByteSize::b(item.payload().size()).to_string(),
        item.payload().name(),
        item.stage_label(),
    );
    if let Some(detail) = item.error_detail() {
        line.push_str(&format!(": {detail}"));
    }
    line
}

/// Print the final table. Returns the number of items in `error`.
fn summarize(items: &[WorkItem], not_queued: usize) -> usize {
    let count = |status: ItemStatus| items.iter().filter(|i| i.status() == status).count();
    let (completed, failed) = (count(ItemStatus::Completed), count(ItemStatus::Error));

    println!();
    for item in items {
        println!("{}", describe(item));
    }
    println!("{completed} uploaded, {failed} failed, {not_queued} not queued");
    failed
}

/// Initialize logging with tracing. Logs go to stderr; stdout carries progress.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vidqueue=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
