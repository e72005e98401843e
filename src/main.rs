use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mdbook::preprocess::{CmdPreprocessor, Preprocessor};
use mdbook_pytabs::cache::{is_cache_dir, CacheStore, FileStore};
use mdbook_pytabs::config::{default_cache_dir, project_cache_dir, PyTabsConfig};
use mdbook_pytabs::preprocessor::open_cache;
use mdbook_pytabs::rendering::{transform_documents, DocumentResult};
use mdbook_pytabs::task_collector::collect_file_tasks;
use mdbook_pytabs::transform::Transformer;
use mdbook_pytabs::upgrade::RuffUpgrader;
use mdbook_pytabs::{reporting, PyTabsPreprocessor};
use std::io;
use std::path::PathBuf;
use std::process::exit;

/// Render Python code blocks as one tab per minimum Python version.
///
/// Without a subcommand, runs as an mdBook preprocessor on stdin/stdout.
#[derive(Parser)]
#[command(name = "mdbook-pytabs", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a renderer is supported (used by mdBook).
    Supports { renderer: String },
    /// Rewrite markdown and reStructuredText files in place.
    Transform(TransformArgs),
    /// Delete the persistent cache.
    ClearCache(ClearCacheArgs),
}

#[derive(Args)]
struct ClearCacheArgs {
    /// Cache directory to delete. It must contain a CACHEDIR.TAG
    #[arg(long, conflicts_with = "all")]
    cache_dir: Option<PathBuf>,

    /// Project whose default cache is deleted
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Delete the default cache of every project
    #[arg(long)]
    all: bool,
}

#[derive(Args)]
struct TransformArgs {
    /// TOML file with the same keys as `[preprocessor.pytabs]`
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root for `/`-prefixed include paths and a relative `cache_dir`
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Report files that would change without writing them
    #[arg(long)]
    check: bool,

    /// Files to transform (.md or .rst)
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

pub fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Supports { renderer }) => {
            let preprocessor = PyTabsPreprocessor::new();
            if preprocessor.supports_renderer(&renderer) {
                exit(0);
            } else {
                exit(1);
            }
        }
        Some(Commands::Transform(args)) => handle_transform(args),
        Some(Commands::ClearCache(args)) => handle_clear_cache(args),
        None => handle_preprocessing(),
    };

    match result {
        Ok(true) => {}
        Ok(false) => exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit(1);
        }
    }
}

fn handle_preprocessing() -> Result<bool> {
    let (ctx, book) = CmdPreprocessor::parse_input(io::stdin())?;

    let preprocessor = PyTabsPreprocessor::new();
    let processed_book = preprocessor.run(&ctx, book)?;

    serde_json::to_writer(io::stdout(), &processed_book)?;

    Ok(true)
}

/// Returns `Ok(false)` when `--check` found files that would change.
fn handle_transform(args: TransformArgs) -> Result<bool> {
    let config = match &args.config {
        Some(path) => PyTabsConfig::from_file(path)?,
        None => PyTabsConfig::default(),
    };
    let settings = config.validate().context("Invalid configuration")?;
    let upgrader = RuffUpgrader::new(config.upgrader.command.clone(), config.upgrader.timeout());

    let cache = open_cache(&config, &args.root);
    if let Some(cache) = &cache {
        cache.mark_build_start();
    }

    let tasks = collect_file_tasks(&args.files, &args.root)?;
    let transformer = Transformer::new(&settings, &upgrader, cache.as_ref());
    let thread_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_count())
        .build()
        .context("Failed to create thread pool")?;

    let (results, parallel_duration) = transform_documents(tasks, &transformer, &thread_pool);

    let failed_results: Vec<&DocumentResult> = results.iter().filter(|r| !r.success()).collect();
    if !failed_results.is_empty() {
        if let Some(cache) = &cache {
            if let Err(e) = cache.abort_build() {
                log::warn!("Failed to persist cache: {}", e);
            }
        }
        reporting::report_failures(&failed_results)?;
    }
    reporting::report_diagnostics(&results);

    let mut unchanged = true;
    for result in &results {
        let Some(content) = result.changed_content() else {
            continue;
        };
        unchanged = false;
        if args.check {
            eprintln!("Would rewrite {}", result.path().display());
        } else {
            std::fs::write(result.path(), content)
                .with_context(|| format!("Failed to write {}", result.path().display()))?;
            log::info!("Rewrote {}", result.path().display());
        }
    }

    if let Some(cache) = &cache {
        if let Err(e) = cache.finish_build() {
            log::warn!("Failed to persist cache: {}", e);
        }
    }
    reporting::print_summary(
        &transformer.stats(),
        cache.as_ref().map(|c| c.stats()),
        &results,
        parallel_duration,
    );

    Ok(!args.check || unchanged)
}

fn handle_clear_cache(args: ClearCacheArgs) -> Result<bool> {
    let dirs = if let Some(dir) = args.cache_dir {
        vec![dir]
    } else if args.all {
        let base = default_cache_dir()?;
        match std::fs::read_dir(&base) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_cache_dir(path))
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", base.display()))
            }
        }
    } else {
        vec![project_cache_dir(&args.root)?]
    };

    if dirs.is_empty() {
        eprintln!("No cache to remove");
    }
    for dir in dirs {
        if !dir.exists() {
            eprintln!("No cache at {}", dir.display());
            continue;
        }
        // Checked before anything is written to the directory
        let store = FileStore::open_existing(&dir)
            .with_context(|| format!("Refusing to remove {}", dir.display()))?;
        store
            .clear()
            .with_context(|| format!("Failed to remove {}", dir.display()))?;
        eprintln!("Removed cache at {}", dir.display());
    }
    Ok(true)
}
