use brainvault::cli::{Cli, Commands, ConfigAction};
use brainvault::config::Config;
use brainvault::curator::Status;
use brainvault::engine::{Engine, RefreshSummary, RetrieveOptions};
use brainvault::error::{Result, VaultError};
use brainvault::source::ReminderDraft;
use brainvault::temporal;
use std::path::PathBuf;

const PREVIEW_CHARS: usize = 240;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Refresh => {
            cmd_refresh(cli.config)?;
        }
        Commands::Curate => {
            cmd_curate(cli.config)?;
        }
        Commands::Index => {
            cmd_index(cli.config)?;
        }
        Commands::Search {
            query,
            k,
            category,
            recent,
            json,
        } => {
            cmd_search(cli.config, &query, k, category, recent, json)?;
        }
        Commands::Window { expr } => {
            cmd_window(&expr);
        }
        Commands::Remember {
            content,
            title,
            tags,
            valid_from,
            valid_to,
            meeting_date,
        } => {
            let draft = ReminderDraft {
                content,
                title,
                tags,
                meeting_date,
                valid_from,
                valid_to,
            };
            cmd_remember(cli.config, &draft)?;
        }
        Commands::Health { sparse } => {
            cmd_health(cli.config, sparse)?;
        }
        Commands::Registry { all } => {
            cmd_registry(cli.config, all)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "brainvault=debug"
    } else {
        "brainvault=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn cmd_refresh(config_path: Option<PathBuf>) -> Result<()> {
    let engine = Engine::new(load_config(config_path)?)?;
    engine.client()?;

    let runtime = runtime()?;
    let summary = runtime.block_on(engine.refresh())?;

    println!("✓ Refresh complete");
    print_summary(&summary);
    Ok(())
}

fn cmd_curate(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = Engine::new(config.clone())?;
    let entries = engine.curate()?;

    let archived = entries
        .iter()
        .filter(|e| e.status == Status::Archived)
        .count();
    println!("✓ Registry written to {}", config.registry_path()?.display());
    println!("  Active: {}", entries.len() - archived);
    println!("  Archived: {}", archived);
    Ok(())
}

fn cmd_index(config_path: Option<PathBuf>) -> Result<()> {
    let engine = Engine::new(load_config(config_path)?)?;
    engine.client()?;

    let runtime = runtime()?;
    let summary = runtime.block_on(engine.index())?;

    println!("✓ Index rebuilt");
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RefreshSummary) {
    println!("  Registry entries: {}", summary.registry_entries);
    println!("  Documents: {}", summary.stats.documents);
    println!("  Records indexed: {}", summary.indexed);
    if summary.stats.skipped_chunks > 0 {
        println!("  Chunks skipped: {}", summary.stats.skipped_chunks);
    }
    println!("  Duration: {}ms", summary.stats.duration_ms);
}

fn cmd_search(
    config_path: Option<PathBuf>,
    query: &str,
    k: usize,
    category: Option<String>,
    recent: bool,
    json: bool,
) -> Result<()> {
    let engine = Engine::new(load_config(config_path)?)?;

    let mut options = RetrieveOptions::new(k);
    options.category = category;
    options.prefer_recent = recent;
    let retrieval = engine.retrieve(query, &options)?;

    if json {
        let json = serde_json::to_string_pretty(&retrieval.results).map_err(|e| VaultError::Json {
            source: e,
            context: "Failed to serialize results".to_string(),
        })?;
        println!("{}", json);
        return Ok(());
    }

    if let Some(window) = &retrieval.window {
        let note = if retrieval.window_applied {
            ""
        } else {
            " (no matches, showing all dates)"
        };
        println!(
            "Window: {} .. {}{}",
            window.first_day(),
            window.last_day(),
            note
        );
    }
    if let Some(category) = &options.category {
        if !retrieval.category_applied {
            println!("No results in category '{}', showing all categories", category);
        }
    }

    if retrieval.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, result) in retrieval.results.iter().enumerate() {
        let record = &result.record;
        println!(
            "{}. {} [{}] relevance {:.3}",
            rank + 1,
            record.title.as_deref().unwrap_or(&record.filename),
            record.category,
            result.relevance
        );
        println!("   {}#{}", record.path, record.chunk_index);
        println!("   {}", result.preview(PREVIEW_CHARS).replace('\n', " "));
    }

    Ok(())
}

fn cmd_window(expr: &str) {
    match temporal::resolve_now(expr) {
        Some(window) => println!("{} .. {}", window.start, window.end),
        None => println!("No date window found in '{}'", expr),
    }
}

fn cmd_remember(config_path: Option<PathBuf>, draft: &ReminderDraft) -> Result<()> {
    let engine = Engine::new(load_config(config_path)?)?;
    let path = engine.remember(draft)?;

    println!("✓ Saved reminder: {}", path.display());
    println!("  Run 'brainvault refresh' to make it searchable");
    Ok(())
}

fn cmd_health(config_path: Option<PathBuf>, sparse_only: bool) -> Result<()> {
    let engine = Engine::new(load_config(config_path)?)?;
    let rows = engine.health()?;

    let sparse = rows.iter().filter(|r| r.is_sparse()).count();
    println!("Documents: {} ({} sparse)", rows.len(), sparse);
    for row in rows.iter().filter(|r| !sparse_only || r.is_sparse()) {
        let flag = if row.is_sparse() { "!" } else { " " };
        println!(
            "{} {:<40} {:<12} chunks {:>3}  chars {:>6}",
            flag, row.filename, row.category, row.chunk_count, row.char_count
        );
    }
    Ok(())
}

fn cmd_registry(config_path: Option<PathBuf>, all: bool) -> Result<()> {
    let engine = Engine::new(load_config(config_path)?)?;

    for entry in engine
        .registry()?
        .iter()
        .filter(|e| all || e.status == Status::Active)
    {
        let valid_to = entry
            .valid_to
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:<32} {:<40} until {}",
            entry.status.to_string(),
            entry.canonical_key, entry.title, valid_to
        );
        if let Some(newer) = &entry.superseded_by {
            println!("         superseded by {}", newer);
        }
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| VaultError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| VaultError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    Config::load_or_default(&path)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| VaultError::Io {
        source: e,
        context: "Failed to create async runtime".to_string(),
    })
}
