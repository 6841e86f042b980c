//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use marketcrawl_core::{RunController, RunRegistry, cleanup_old_files};
use marketcrawl_crawler::check_proxy;
use marketcrawl_shared::{
    AppConfig, Category, CrawlConfig, ProxyIdentity, RunId, RunParameters, RunStatus, init_config,
    load_config,
};
use marketcrawl_storage::{RunRecord, Storage};
use tracing::info;

use crate::progress::StoreProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// MarketCrawl — crawl marketplace catalogs into spreadsheets.
#[derive(Parser)]
#[command(
    name = "marketcrawl",
    version,
    about = "Crawl marketplace categories through rotating proxies and export product cards to XLSX.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl one or more categories and export the products.
    Run {
        /// Run name; prefixes the exported file.
        #[arg(short, long)]
        name: String,

        /// Category listing URL (repeatable).
        #[arg(short, long = "category", required = true)]
        categories: Vec<String>,

        /// City recorded with the run (repeatable).
        #[arg(long = "city")]
        cities: Vec<String>,

        /// Proxy as host:port or scheme://[user:pass@]host:port (repeatable).
        #[arg(short, long = "proxy")]
        proxies: Vec<String>,

        /// File with one proxy per line; `#` starts a comment.
        #[arg(long)]
        proxies_file: Option<PathBuf>,

        /// Concurrent product fetches (capped at 12).
        #[arg(short = 'w', long)]
        max_workers: Option<usize>,

        /// Never split large categories into price bands.
        #[arg(long)]
        no_price_split: bool,

        /// Directory for the exported file (defaults to the configured data dir).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Inspect recorded runs.
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Check whether a proxy can reach the marketplace.
    CheckProxy {
        /// Proxy to probe.
        proxy: String,

        /// Site to request through the proxy (defaults to the configured health-check URL).
        #[arg(long)]
        site: Option<String>,
    },

    /// Delete exported files older than the retention period.
    Cleanup {
        /// Age in days (defaults to the configured retention).
        #[arg(long)]
        days: Option<u64>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Run history subcommands.
#[derive(Subcommand)]
pub(crate) enum RunsAction {
    /// List runs, newest first.
    List,
    /// Show one run.
    Show {
        id: String,
        /// Print the record as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Delete a run and its exported file.
    Delete { id: String },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "marketcrawl=info",
        1 => "marketcrawl=debug",
        _ => "marketcrawl=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            name,
            categories,
            cities,
            proxies,
            proxies_file,
            max_workers,
            no_price_split,
            out,
        } => {
            let config = load_config()?;
            let mut proxies = proxies;
            if let Some(path) = proxies_file {
                proxies.extend(read_proxies_file(&path)?);
            }
            let params = RunParameters {
                name,
                categories: parse_categories(&categories)?,
                cities,
                proxies,
                max_workers: max_workers.unwrap_or(config.defaults.max_workers),
                price_split: config.defaults.price_split && !no_price_split,
            };
            cmd_run(&config, params, out).await
        }
        Command::Runs { action } => match action {
            RunsAction::List => cmd_runs_list().await,
            RunsAction::Show { id, json } => cmd_runs_show(&id, json).await,
            RunsAction::Delete { id } => cmd_runs_delete(&id).await,
        },
        Command::CheckProxy { proxy, site } => cmd_check_proxy(&proxy, site.as_deref()).await,
        Command::Cleanup { days } => cmd_cleanup(days),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig, params: RunParameters, out: Option<PathBuf>) -> Result<()> {
    params.validate()?;

    let data_dir = out.unwrap_or_else(|| PathBuf::from(&config.defaults.data_dir));

    let storage = Arc::new(Storage::open(Path::new(&config.defaults.db_path)).await?);
    let run_id = RunId::new();
    storage
        .insert_run(&run_id, &params, config.defaults.retention_days)
        .await?;

    info!(
        %run_id,
        name = %params.name,
        categories = params.categories.len(),
        proxies = params.proxies.len(),
        "starting run"
    );

    let progress = Arc::new(StoreProgress::new(storage.clone(), &params.name));
    let controller = RunController::new(CrawlConfig::from(config), &data_dir)
        .with_progress(progress.clone());
    let registry = Arc::new(RunRegistry::new(controller));
    let name = params.name.clone();
    registry.start(run_id.clone(), params)?;

    let interrupt = {
        let registry = registry.clone();
        let progress = progress.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                progress.stopping();
                registry.stop(&run_id);
            }
        })
    };

    let state = registry
        .wait(&run_id)
        .await
        .ok_or_else(|| eyre!("run {run_id} is not registered"))?;
    interrupt.abort();
    progress.finish();

    let filename = state
        .filename
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());
    storage
        .finish_run(
            &run_id,
            state.status,
            state.collected_links,
            state.collected_items,
            filename.as_deref(),
            state.error.as_deref(),
        )
        .await?;

    println!();
    println!("  Run {}", state.status);
    println!("  ID:     {run_id}");
    println!("  Name:   {name}");
    println!("  Links:  {}", state.collected_links);
    println!("  Items:  {}", state.collected_items);
    if let Some(file) = &filename {
        println!("  File:   {file}");
    }
    println!();

    match (state.status, state.error) {
        (RunStatus::Error, Some(message)) => Err(eyre!("run failed: {message}")),
        (RunStatus::Error, None) => Err(eyre!("run failed")),
        _ => Ok(()),
    }
}

async fn cmd_runs_list() -> Result<()> {
    let Some(storage) = open_existing().await? else {
        println!("No runs recorded yet.");
        return Ok(());
    };

    let runs = storage.list_runs().await?;
    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<8}  {:>8}  {:>8}  {:<16}  NAME",
        "ID", "STATUS", "LINKS", "ITEMS", "CREATED"
    );
    for run in &runs {
        println!(
            "{:<36}  {:<8}  {:>8}  {:>8}  {:<16}  {}",
            run.id.to_string(),
            run.status.as_str(),
            run.collected_links,
            run.collected_items,
            run.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            run.name
        );
    }
    Ok(())
}

async fn cmd_runs_show(id: &str, json: bool) -> Result<()> {
    let run_id: RunId = id.parse().map_err(|e| eyre!("invalid run id '{id}': {e}"))?;
    let storage = open_existing()
        .await?
        .ok_or_else(|| eyre!("no runs recorded yet"))?;
    let run = storage
        .get_run(&run_id)
        .await?
        .ok_or_else(|| eyre!("run {run_id} not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run(&run);
    }
    Ok(())
}

async fn cmd_runs_delete(id: &str) -> Result<()> {
    let run_id: RunId = id.parse().map_err(|e| eyre!("invalid run id '{id}': {e}"))?;
    let config = load_config()?;
    let storage = Storage::open(Path::new(&config.defaults.db_path)).await?;

    let run = storage
        .get_run(&run_id)
        .await?
        .ok_or_else(|| eyre!("run {run_id} not found"))?;
    if run.status == RunStatus::Running {
        return Err(eyre!("run {run_id} is still running"));
    }

    if let Some(file) = &run.filename {
        match std::fs::remove_file(file) {
            Ok(()) => info!(file, "removed exported file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(eyre!("failed to remove {file}: {e}")),
        }
    }
    storage.delete_run(&run_id).await?;

    println!("Deleted run {run_id} ({})", run.name);
    Ok(())
}

async fn cmd_check_proxy(proxy: &str, site: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let crawl = CrawlConfig::from(&config);
    let proxy: ProxyIdentity = proxy.parse()?;
    let site = site.unwrap_or(&crawl.health_check_url);

    let ok = check_proxy(&proxy, site, crawl.probe_timeout, &crawl.user_agent).await;
    info!(%proxy, site, ok, "proxy checked");
    println!("{}", if ok { "OK" } else { "BAD" });
    Ok(())
}

fn cmd_cleanup(days: Option<u64>) -> Result<()> {
    let config = load_config()?;
    let days = days.unwrap_or(config.defaults.retention_days);
    let dir = PathBuf::from(&config.defaults.data_dir);

    let removed = cleanup_old_files(&dir, days);
    println!("Removed {removed} entries older than {days} days from {}", dir.display());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Open the configured database read-only, or `None` if it was never created.
async fn open_existing() -> Result<Option<Storage>> {
    let config = load_config()?;
    let path = PathBuf::from(&config.defaults.db_path);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(Storage::open_readonly(&path).await?))
}

fn parse_categories(raw: &[String]) -> Result<Vec<Category>> {
    Ok(raw
        .iter()
        .map(|c| c.parse::<Category>())
        .collect::<marketcrawl_shared::Result<_>>()?)
}

/// Proxy entries from a file: one per line, blank lines and `#` comments skipped.
fn read_proxies_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| eyre!("cannot read proxies file {}: {e}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

fn print_run(run: &RunRecord) {
    println!();
    println!("  ID:         {}", run.id);
    println!("  Name:       {}", run.name);
    println!("  Status:     {}", run.status);
    println!("  Created:    {}", run.created_at.to_rfc3339());
    println!("  Expires:    {}", run.expire_at.to_rfc3339());
    println!("  Links:      {}", run.collected_links);
    println!("  Items:      {}", run.collected_items);
    println!("  Categories: {}", run.categories.join(", "));
    if !run.cities.is_empty() {
        println!("  Cities:     {}", run.cities.join(", "));
    }
    println!("  Proxies:    {}", run.proxies.len());
    if let Some(file) = &run.filename {
        println!("  File:       {file}");
    }
    if let Some(error) = run.error() {
        println!("  Error:      {error}");
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_command() {
        let cli = Cli::try_parse_from([
            "marketcrawl",
            "run",
            "--name",
            "Rings",
            "--category",
            "https://shop.example.com/c/rings",
            "--category",
            "https://shop.example.com/c/chains",
            "--proxy",
            "10.0.0.1:3128",
            "--city",
            "Almaty",
            "-w",
            "20",
            "--no-price-split",
        ])
        .expect("valid args");

        match cli.command {
            Command::Run {
                name,
                categories,
                proxies,
                cities,
                max_workers,
                no_price_split,
                ..
            } => {
                assert_eq!(name, "Rings");
                assert_eq!(categories.len(), 2);
                assert_eq!(proxies, vec!["10.0.0.1:3128"]);
                assert_eq!(cities, vec!["Almaty"]);
                assert_eq!(max_workers, Some(20));
                assert!(no_price_split);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn run_requires_a_category() {
        assert!(Cli::try_parse_from(["marketcrawl", "run", "--name", "Rings"]).is_err());
    }

    #[test]
    fn bad_category_is_rejected() {
        assert!(parse_categories(&["not a url".into()]).is_err());
        assert_eq!(
            parse_categories(&["https://shop.example.com/c/rings".into()])
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn proxies_file_skips_comments_and_blanks() {
        let path = std::env::temp_dir().join(format!("mc-proxies-{}.txt", uuid::Uuid::now_v7()));
        std::fs::write(
            &path,
            "# office pool\n10.0.0.1:3128\n\n  socks5://u:p@10.0.0.2:1080  \n#10.0.0.3:3128\n",
        )
        .unwrap();

        let proxies = read_proxies_file(&path).unwrap();
        assert_eq!(proxies, vec!["10.0.0.1:3128", "socks5://u:p@10.0.0.2:1080"]);

        let _ = std::fs::remove_file(&path);
    }
}
