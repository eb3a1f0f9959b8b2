use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docscope_core::{
    EngineConfig, FolderWatcher, IndexingJob, Registry, RegistryEvent, RootScope, SearchRequest,
};

/// Command-line front end for the docscope index registry.
#[derive(Parser, Debug)]
#[command(
    name = "docscope",
    version,
    about = "Incremental full-text indexing and search of local folders"
)]
struct Cli {
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "Configuration file (default: none, DOCSCOPE__* variables still apply)"
    )]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index a folder and register it.
    Add { dir: PathBuf },
    /// Bring registered folders up to date (all of them when none is given).
    Update { dirs: Vec<PathBuf> },
    /// Discard and rebuild the index of a registered folder.
    Rebuild { dir: PathBuf },
    /// Unregister a folder and delete its index.
    Remove { dir: PathBuf },
    /// Show registered folders.
    List,
    /// Query every registered index.
    Search {
        query: String,
        #[arg(long, value_name = "N", help = "Max hits (default: max_results)")]
        limit: Option<usize>,
        #[arg(long, value_name = "GLOB", help = "Only show paths matching GLOB")]
        glob: Option<String>,
        #[arg(long, help = "Require every bare term (default: any term)")]
        all: bool,
    },
    /// Keep registered folders current until interrupted.
    Watch,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    let registry = Registry::load(config)?;

    let outcome = run(&registry, cli.command);
    registry.shutdown()?;
    outcome
}

fn run(registry: &Registry, command: Command) -> Result<()> {
    match command {
        Command::Add { dir } => {
            if !dir.is_dir() {
                bail!("not a folder: {}", dir.display());
            }
            let scope = registry.create_scope(&dir);
            run_job(registry, IndexingJob::register(scope))
        }
        Command::Update { dirs } => {
            let scopes = if dirs.is_empty() {
                registry.entries()
            } else {
                dirs.iter()
                    .map(|dir| registered(registry, dir))
                    .collect::<Result<Vec<_>>>()?
            };
            let events = registry.subscribe();
            let start = Instant::now();
            for scope in scopes {
                registry.submit(IndexingJob::update(scope))?;
            }
            registry.wait_until_idle();
            report_failures(&events);
            println!(
                "[INFO] update finished in {:.2} s",
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Command::Rebuild { dir } => {
            let scope = registered(registry, &dir)?;
            run_job(registry, IndexingJob::new(scope, false, true).with_ready(true))
        }
        Command::Remove { dir } => {
            registry.remove(&dir)?;
            println!("[INFO] removed {}", dir.display());
            Ok(())
        }
        Command::List => {
            for scope in registry.entries() {
                println!(
                    "{}  files={} errors={}{}",
                    scope.directory().display(),
                    scope.file_count(),
                    scope.parse_errors().len(),
                    if scope.finished_with_errors() { " (finished with errors)" } else { "" }
                );
            }
            Ok(())
        }
        Command::Search {
            query,
            limit,
            glob,
            all,
        } => {
            let request = SearchRequest {
                text: query.clone(),
                limit,
                use_or_operator: all.then_some(false),
                path_glob: glob,
            };
            let start = Instant::now();
            let hits = registry.search(&request)?;
            println!(
                "query=\"{}\" hits={} took={}ms",
                query,
                hits.len(),
                start.elapsed().as_millis()
            );
            for hit in &hits {
                match &hit.document.title {
                    Some(title) => {
                        println!("  {:.3}  {} ({title})", hit.score, hit.path().display())
                    }
                    None => println!("  {:.3}  {}", hit.score, hit.path().display()),
                }
            }
            Ok(())
        }
        Command::Watch => watch(registry),
    }
}

fn registered(registry: &Registry, dir: &Path) -> Result<Arc<RootScope>> {
    registry
        .entry_for(dir)
        .with_context(|| format!("not a registered folder: {}", dir.display()))
}

fn run_job(registry: &Registry, job: IndexingJob) -> Result<()> {
    let events = registry.subscribe();
    let scope = job.scope().clone();
    let start = Instant::now();
    registry.submit(job)?;
    registry.wait_until_idle();

    if report_failures(&events) {
        bail!("indexing {} failed", scope.directory().display());
    }
    println!(
        "[INFO] {}: {} files ({:.2} s, {} parse errors)",
        scope.directory().display(),
        scope.file_count(),
        start.elapsed().as_secs_f64(),
        scope.parse_errors().len()
    );
    for err in scope.parse_errors() {
        eprintln!("[WARN] {err}");
    }
    Ok(())
}

/// Print failed jobs; true when there was at least one.
fn report_failures(events: &Receiver<RegistryEvent>) -> bool {
    let mut failed = false;
    for event in events.try_iter() {
        if let RegistryEvent::JobFailed {
            job,
            directory,
            message,
        } = event
        {
            eprintln!("[WARN] {job} for {}: {message}", directory.display());
            failed = true;
        }
    }
    failed
}

fn watch(registry: &Registry) -> Result<()> {
    let events = registry.subscribe();
    let mut watcher = FolderWatcher::start(registry)?;
    for dir in watcher.watched() {
        println!("[INFO] watching {}", dir.display());
    }

    for event in events {
        match event {
            RegistryEvent::RootsChanged => watcher.sync()?,
            RegistryEvent::TreeChanged(dir) => println!("[INFO] updated {}", dir.display()),
            RegistryEvent::JobFailed {
                job,
                directory,
                message,
            } => eprintln!("[WARN] {job} for {}: {message}", directory.display()),
            RegistryEvent::QueueChanged => {}
        }
    }
    Ok(())
}
