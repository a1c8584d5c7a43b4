use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use piper_cache::{
    config::{CacheConfig, CacheConfigBuilder},
    core::{CacheManager, CacheMessage, HeapBackend, Locality, ManagerExit, MemoryBackend, SegmentId},
    observability::logging::{init_logging, LoggingConfig},
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "piper-cache")]
#[command(about = "Worker object cache manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a cache manager over a JSON-lines command script
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Command script, one JSON message per line. Reads stdin when omitted.
    script: Option<PathBuf>,

    /// JSON configuration file; overrides the capacity flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host cache capacity in bytes
    #[arg(long, default_value_t = 1024 * 1024 * 1024)]
    cpu_capacity: u64,

    /// GPU device as `<device_id>,<pci_bus_id>,<capacity_bytes>`; commas
    /// because PCI bus ids contain colons
    #[arg(long = "gpu", value_parser = parse_gpu_device)]
    gpus: Vec<(u32, String, u64)>,

    #[arg(long)]
    profiling: bool,

    /// Directory for profiler output and log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: String,

    #[arg(long)]
    json_logs: bool,
}

fn parse_gpu_device(value: &str) -> Result<(u32, String, u64), String> {
    let parts: Vec<&str> = value.split(',').collect();
    let [id, pci, capacity] = parts.as_slice() else {
        return Err(format!(
            "expected <device_id>,<pci_bus_id>,<capacity_bytes>, got '{}'",
            value
        ));
    };
    let id = id
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid device id '{}': {}", id, e))?;
    let capacity = capacity
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid capacity '{}': {}", capacity, e))?;
    Ok((id, pci.trim().to_string(), capacity))
}

impl RunArgs {
    fn cache_config(&self) -> anyhow::Result<CacheConfig> {
        if let Some(path) = &self.config {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            return Ok(CacheConfig::from_json_str(&json)?);
        }
        let builder = self.gpus.iter().fold(
            CacheConfigBuilder::new().cpu_capacity(self.cpu_capacity),
            |builder, (id, pci, capacity)| builder.gpu_device(*id, pci.as_str(), *capacity),
        );
        Ok(builder
            .profiling(self.profiling)
            .log_dir(self.log_dir.clone())
            .build()?)
    }

    fn logging_config(&self) -> anyhow::Result<LoggingConfig> {
        let level = self
            .log_level
            .to_uppercase()
            .parse::<Level>()
            .with_context(|| format!("invalid log level '{}'", self.log_level))?;
        Ok(LoggingConfig {
            level,
            json_format: self.json_logs,
            log_dir: self.log_dir.clone(),
        })
    }
}

/// Make sure the segment a script refers to exists in the heap backend
fn ensure_segment(backend: &HeapBackend, handle: &SegmentId, size: u64) -> anyhow::Result<()> {
    if !backend.contains(handle) {
        let len = usize::try_from(size).context("segment size does not fit in memory")?;
        backend.insert_named(handle.clone(), Locality::Cpu, vec![0; len]);
    }
    Ok(())
}

async fn replay<R: AsyncBufRead + Unpin>(
    reader: R,
    client: &piper_cache::CacheClient,
    backend: &HeapBackend,
) -> anyhow::Result<()> {
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let message: CacheMessage =
            serde_json::from_str(line).with_context(|| format!("line {}: invalid message", line_no))?;

        match &message {
            CacheMessage::Put { handle, size, .. }
            | CacheMessage::PutGpu { handle, size, .. }
            | CacheMessage::Replace { handle, size, .. } => {
                ensure_segment(backend, handle, *size)?;
            }
            _ => {}
        }

        let action = message.action();
        if action.is_query() {
            let file_name = message.file_name().unwrap_or_default().to_string();
            let answer = client.query(message).await;
            println!("{} {} {}", action, file_name, answer);
        } else {
            let quit = matches!(message, CacheMessage::Quit);
            if !client.submit(message) {
                warn!(line = line_no, %action, "Cache manager stopped, ignoring message");
            }
            if quit {
                break;
            }
        }
    }
    Ok(())
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let _log_guard = init_logging(args.logging_config()?);
    let config = args.cache_config()?;

    let backend = HeapBackend::new();
    let shared: Arc<dyn MemoryBackend> = Arc::new(backend.clone());
    let (client, handle) = CacheManager::spawn(config, shared)?;

    match &args.script {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            replay(BufReader::new(file), &client, &backend).await?;
        }
        None => replay(BufReader::new(tokio::io::stdin()), &client, &backend).await?,
    }
    drop(client);

    match handle.await? {
        ManagerExit::Quit(summary) | ManagerExit::Disconnected(summary) => {
            info!(
                entries = summary.entries,
                used_size = summary.used_size,
                max_size = summary.max_size,
                "Cache manager finished"
            );
            Ok(())
        }
        ManagerExit::Failed(e) => bail!("cache manager terminated: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
    }
}
