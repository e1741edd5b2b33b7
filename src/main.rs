//! gitweave - inspect a repository through the client core
//!
//! Run with `gitweave` or `gitweave --help` for usage.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use futures::future::join_all;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use gitweave::{
    APP_NAME, Config, JobHandle, JobOutput, ReadJob, RepoId, StateChange, VERSION, Workspace,
    diff::{ChangeKind, patch},
    git::{CommitId, DiffTarget, PageRequest, PathFilter, SearchQuery, SearchScope, StatusReport, WalkSpec},
    graph::GraphLayout,
};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "Inspect a git repository through the gitweave core")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Repository path (default: current directory)
    #[arg(short = 'C', long, global = true)]
    repo: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show working tree status
    Status,

    /// Show history with graph lanes
    Log {
        /// Start from this revision instead of every ref
        revision: Option<String>,

        /// Number of commits to show
        #[arg(short = 'n', long, default_value_t = 30)]
        limit: usize,
    },

    /// Show unstaged changes, or staged ones with --staged
    Diff {
        #[arg(long)]
        staged: bool,

        /// Restrict to these paths
        paths: Vec<String>,
    },

    /// Show a commit and the changes it introduced
    Show {
        #[arg(default_value = "HEAD")]
        revision: String,
    },

    /// Show who last changed each line of a file
    Blame {
        path: String,

        #[arg(short, long)]
        revision: Option<String>,
    },

    /// Find commits by message, author, path or content
    Search {
        text: String,

        /// message, author, path or content
        #[arg(short, long, default_value = "message")]
        scope: String,

        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },

    /// Print a file as of a revision
    Cat { revision: String, path: String },

    /// List configured remotes
    Remotes,

    /// Report external changes until interrupted
    Watch,

    /// Show configuration
    Config {
        /// Initialize config file with defaults
        #[arg(long)]
        init: bool,
    },
}

fn setup_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        // Use info level for our crate, warn for dependencies
        EnvFilter::new("info")
            .add_directive("gix=warn".parse()?)
            .add_directive("tokio=warn".parse()?)
            .add_directive("notify=warn".parse()?)
    };

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(file).with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .init();
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status_code(kind: Option<ChangeKind>) -> char {
    match kind {
        None => ' ',
        Some(ChangeKind::Added) => 'A',
        Some(ChangeKind::Deleted) => 'D',
        Some(ChangeKind::Modified) | Some(ChangeKind::Binary) => 'M',
        Some(ChangeKind::Renamed) => 'R',
    }
}

fn print_status(report: &StatusReport) {
    let branch = report.branch.head.as_deref().unwrap_or("(detached)");
    match &report.branch.upstream {
        Some(upstream) => println!(
            "## {branch}...{upstream} [ahead {}, behind {}]",
            report.branch.ahead, report.branch.behind
        ),
        None => println!("## {branch}"),
    }
    for entry in &report.entries {
        let code = if entry.conflicted {
            "UU".to_string()
        } else if entry.untracked {
            "??".to_string()
        } else {
            format!("{}{}", status_code(entry.staged), status_code(entry.unstaged))
        };
        match &entry.orig_path {
            Some(orig) => println!("{code} {orig} -> {}", entry.path),
            None => println!("{code} {}", entry.path),
        }
    }
}

/// One text row per commit: lane markers, short id, summary
fn print_graph(layout: &GraphLayout, limit: usize) {
    for entry in layout.entries.iter().take(limit) {
        let lanes: String = (0..layout.width)
            .map(|column| {
                if column == entry.column {
                    if entry.commit.is_merge() { 'M' } else { '*' }
                } else if entry.passing.contains(&column) {
                    '|'
                } else {
                    ' '
                }
            })
            .flat_map(|c| [c, ' '])
            .collect();
        println!(
            "{lanes} {} {} ({})",
            entry.commit.id.short(),
            entry.commit.summary(),
            entry.commit.author.name
        );
    }
}

async fn resolve_commit(workspace: &Workspace, repo: RepoId, revision: &str) -> Result<CommitId> {
    let job = ReadJob::WalkCommits {
        spec: WalkSpec::from_revision(revision),
        page: PageRequest { skip: 0, limit: 1 },
    };
    match workspace.execute(repo, job).await? {
        JobOutput::Commits(page) => page
            .commits
            .into_iter()
            .next()
            .map(|c| c.id)
            .ok_or_else(|| eyre!("no commit at {revision}")),
        other => Err(eyre!("unexpected output {other:?}")),
    }
}

async fn watch(workspace: &Workspace, repo: RepoId) -> Result<()> {
    let mut changes = workspace.subscribe();
    println!("Watching {} (Ctrl-C to stop)", workspace.workdir(repo).unwrap_or_default().display());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(StateChange::Invalidated { sections, .. }) => {
                    println!("changed: {sections}");
                    let handles = workspace.refresh_stale(repo)?;
                    for finished in join_all(handles.into_iter().map(JobHandle::wait)).await {
                        finished?;
                    }
                    let status = workspace.status(repo).await?;
                    print_status(&status);
                }
                Ok(StateChange::Unavailable { reason, .. }) => {
                    println!("repository unavailable: {reason}");
                    break;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    info!(missed, "change notifications lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre error hooks
    color_eyre::install()?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };
    setup_logging(cli.debug || config.debug, config.log_file.as_deref())?;

    if let Commands::Config { init } = cli.command {
        if init {
            config.save()?;
            println!(
                "Configuration initialized at {:?}",
                Config::config_file_path()?
            );
        } else {
            println!("{}", toml::to_string_pretty(&config)?);
            println!("\nConfig file: {:?}", Config::config_file_path()?);
        }
        return Ok(());
    }

    // Only the watch command needs file system events
    config.watch_enabled = matches!(cli.command, Commands::Watch);

    let path = match cli.repo {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let workspace = Workspace::new(config);
    let repo = workspace.open(&path)?;
    info!(path = %path.display(), "{} v{}", APP_NAME, VERSION);

    match cli.command {
        Commands::Status => {
            let status = workspace.status(repo).await?;
            if cli.json {
                print_json(status.as_ref())?;
            } else {
                print_status(&status);
            }
        }

        Commands::Log { revision, limit } => {
            let layout = match revision {
                None => {
                    let mut window = workspace.commits(repo).await?;
                    while window.len() < limit && !window.exhausted {
                        window = workspace.load_more_commits(repo).await?;
                    }
                    workspace.graph(repo).await?
                }
                Some(revision) => {
                    let mut walk = workspace.commit_walk(repo, WalkSpec::from_revision(revision))?;
                    let mut commits = Vec::new();
                    while commits.len() < limit {
                        match walk.next_page().await? {
                            Some(page) => commits.extend(page.into_iter().map(Arc::new)),
                            None => break,
                        }
                    }
                    commits.truncate(limit);
                    Arc::new(gitweave::graph::layout_with_palette(
                        &commits,
                        workspace.config().graph_palette_size,
                    ))
                }
            };
            if cli.json {
                let commits: Vec<_> = layout.entries.iter().take(limit).map(|e| e.commit.as_ref()).collect();
                print_json(&commits)?;
            } else {
                print_graph(&layout, limit);
            }
        }

        Commands::Diff { staged, paths } => {
            let target = if staged { DiffTarget::Staged } else { DiffTarget::Workdir };
            let files = if paths.is_empty() {
                workspace.diff(repo, target).await?.files.clone()
            } else {
                let job = ReadJob::Diff {
                    target,
                    filter: PathFilter::only(paths),
                };
                match workspace.execute(repo, job).await? {
                    JobOutput::Diff { files, .. } => files,
                    other => return Err(eyre!("unexpected output {other:?}")),
                }
            };
            if cli.json {
                print_json(&files)?;
            } else {
                print!("{}", patch::render_files(&files));
            }
        }

        Commands::Show { revision } => {
            let id = resolve_commit(&workspace, repo, &revision).await?;
            let diffs = workspace.diff(repo, DiffTarget::Commit(id.clone())).await?;
            let commit = workspace
                .commit_walk(repo, WalkSpec::from_revision(id.to_string()))?
                .next_page()
                .await?
                .and_then(|page| page.into_iter().next())
                .ok_or_else(|| eyre!("commit {id} vanished"))?;
            if cli.json {
                print_json(&serde_json::json!({ "commit": commit, "files": diffs.files }))?;
            } else {
                println!("commit {}", commit.id);
                println!("Author: {} <{}>", commit.author.name, commit.author.email);
                println!("Date:   {}", commit.author.time.to_rfc2822());
                println!();
                for line in commit.message.lines() {
                    println!("    {line}");
                }
                println!();
                print!("{}", patch::render_files(&diffs.files));
            }
        }

        Commands::Blame { path, revision } => {
            match workspace.execute(repo, ReadJob::Blame { path, revision }).await? {
                JobOutput::Blame { lines, .. } => {
                    if cli.json {
                        print_json(&lines)?;
                    } else {
                        for line in lines {
                            println!(
                                "{} ({:<16} {}) {:>4} {}",
                                line.commit.short(),
                                line.author,
                                line.time.format("%Y-%m-%d"),
                                line.line,
                                line.content
                            );
                        }
                    }
                }
                other => return Err(eyre!("unexpected output {other:?}")),
            }
        }

        Commands::Search { text, scope, limit } => {
            let scope: SearchScope = scope.parse()?;
            let query = SearchQuery {
                limit,
                ..SearchQuery::new(text, scope)
            };
            match workspace.execute(repo, ReadJob::Search(query)).await? {
                JobOutput::Search(commits) => {
                    if cli.json {
                        print_json(&commits)?;
                    } else {
                        for commit in commits {
                            println!("{} {}", commit.id.short(), commit.summary());
                        }
                    }
                }
                other => return Err(eyre!("unexpected output {other:?}")),
            }
        }

        Commands::Cat { revision, path } => {
            match workspace.execute(repo, ReadJob::ReadFileAt { path, revision }).await? {
                JobOutput::Content(bytes) => std::io::stdout().write_all(&bytes)?,
                other => return Err(eyre!("unexpected output {other:?}")),
            }
        }

        Commands::Remotes => match workspace.execute(repo, ReadJob::ListRemotes).await? {
            JobOutput::Remotes(remotes) => {
                if cli.json {
                    print_json(&remotes)?;
                } else {
                    for remote in remotes {
                        println!("{}\t{}", remote.name, remote.url.unwrap_or_default());
                    }
                }
            }
            other => return Err(eyre!("unexpected output {other:?}")),
        },

        Commands::Watch => watch(&workspace, repo).await?,

        Commands::Config { .. } => {}
    }

    workspace.shutdown();
    Ok(())
}
