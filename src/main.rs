use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use drover::config::Config;
use drover::git::GitOps;
use drover::orchestration::{
    ClaudeEngine, DeferredTaskTracker, FeedbackQueue, LogObserver, ModelFallbackManager,
    ParallelExecutor, ParallelOptions, RetryPolicy, SequentialExecutor, SequentialOptions,
    WorktreeProvider,
};
use drover::source::{CachedSource, MarkdownSource, TaskSource};
use drover::{dlog, Error, Result};

/// Drover - autonomous backlog runner driving an external coding agent
#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    DROVER_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.drover/drover.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Execute the backlog in a PRD file
    Run {
        /// Path to the markdown backlog (checklist items)
        prd: PathBuf,

        /// Run tasks concurrently in isolated worktrees, N workers
        /// (0 = the configured default)
        #[arg(short = 'p', long, value_name = "N")]
        parallel: Option<usize>,

        /// Leave worker branches unmerged for manual integration
        #[arg(long)]
        skip_merge: bool,

        /// Sequential mode: dedicated branch per task
        #[arg(long)]
        branch_per_task: bool,

        /// Open a pull request per completed task branch (needs `gh`)
        #[arg(long)]
        create_pr: bool,

        /// Prompt for follow-up input after each completed task
        #[arg(short = 'i', long)]
        interactive: bool,

        /// Stop after N loop iterations
        #[arg(long, value_name = "N")]
        max_iterations: Option<u64>,

        /// Primary model to request
        #[arg(long)]
        model: Option<String>,

        /// Model substituted after rate-limit signals
        #[arg(long)]
        fallback_model: Option<String>,

        /// Attempts per task before a retryable failure surfaces
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,

        /// Seconds between retry attempts
        #[arg(long, value_name = "SECS")]
        retry_delay: Option<u64>,

        /// Branch point and merge target (defaults to current HEAD)
        #[arg(long)]
        base_branch: Option<String>,

        /// Extra argument passed to every engine invocation (repeatable)
        #[arg(long = "engine-arg", value_name = "ARG")]
        engine_args: Vec<String>,
    },

    /// Show how many tasks remain in a backlog
    Status {
        /// Path to the markdown backlog
        prd: PathBuf,
    },

    /// Prune stale drover worktrees and branches in this repository
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    drover::log::init_with_debug(cli.debug);
    Config::ensure_dirs()?;

    match cli.command {
        Command::Run {
            prd,
            parallel,
            skip_merge,
            branch_per_task,
            create_pr,
            interactive,
            max_iterations,
            model,
            fallback_model,
            max_retries,
            retry_delay,
            base_branch,
            engine_args,
        } => {
            let mut config = Config::load()?;
            if model.is_some() {
                config.model = model;
            }
            if fallback_model.is_some() {
                config.fallback_model = fallback_model;
            }
            if let Some(n) = max_retries {
                config.max_retries = n;
            }
            if let Some(secs) = retry_delay {
                config.retry_delay_secs = secs;
            }
            if create_pr {
                config.create_pr = true;
            }

            let exit_code = run_backlog(RunArgs {
                config,
                prd,
                parallel,
                skip_merge,
                branch_per_task,
                interactive,
                max_iterations,
                base_branch,
                engine_args,
            })
            .await?;
            std::process::exit(exit_code);
        }
        Command::Status { prd } => run_status(prd),
        Command::Cleanup => run_cleanup(),
    }
}

struct RunArgs {
    config: Config,
    prd: PathBuf,
    parallel: Option<usize>,
    skip_merge: bool,
    branch_per_task: bool,
    interactive: bool,
    max_iterations: Option<u64>,
    base_branch: Option<String>,
    engine_args: Vec<String>,
}

async fn run_backlog(args: RunArgs) -> Result<i32> {
    let RunArgs {
        config,
        prd,
        parallel,
        skip_merge,
        branch_per_task,
        interactive,
        max_iterations,
        base_branch,
        engine_args,
    } = args;

    let source = CachedSource::new(MarkdownSource::new(&prd)?);
    dlog!(
        "Run starting: {} ({} task(s) remaining)",
        prd.display(),
        source.count_remaining()?
    );

    // The configured command may carry baked-in arguments.
    let mut command_parts = config.effective_command().split_whitespace();
    let binary = command_parts.next().unwrap_or("claude");
    let mut all_engine_args: Vec<String> = command_parts.map(String::from).collect();
    all_engine_args.extend(engine_args);

    let engine = ClaudeEngine::with_command(binary)?;
    let policy = RetryPolicy::new(config.max_retries, config.retry_delay());
    let fallback = ModelFallbackManager::new(
        config.model.clone(),
        config.fallback_model.clone(),
        config.fallback_retry_interval(),
        config.retry_in_fallback,
    );
    let deferred = DeferredTaskTracker::open_default()?;
    let workdir = std::env::current_dir()?;

    let totals = match parallel {
        Some(max_parallel) => {
            let git = GitOps::new(&workdir)?;
            let provider = WorktreeProvider::new(GitOps::new(&workdir)?, Config::worktrees_dir()?);
            let mut executor = ParallelExecutor::new(
                source,
                engine,
                provider,
                policy,
                fallback,
                deferred,
                Box::new(LogObserver),
                git,
                ParallelOptions {
                    max_parallel: if max_parallel == 0 {
                        config.max_parallel.max(1)
                    } else {
                        max_parallel
                    },
                    skip_merge,
                    base_branch,
                    engine_args: all_engine_args,
                },
            );
            executor.run().await?
        }
        None => {
            let git = GitOps::new(&workdir).ok();
            if branch_per_task && git.is_none() {
                return Err(Error::Validation(
                    "--branch-per-task requires a git repository".to_string(),
                ));
            }
            let (feedback, _sender) = FeedbackQueue::with_default_capacity();
            let mut executor = SequentialExecutor::new(
                source,
                engine,
                policy,
                fallback,
                deferred,
                Box::new(LogObserver),
                feedback,
                git,
                workdir,
                SequentialOptions {
                    max_iterations,
                    branch_per_task,
                    base_branch,
                    create_pr: config.create_pr,
                    interactive,
                    followup_timeout: Duration::from_secs(30),
                    engine_args: all_engine_args,
                },
            );
            executor.run().await?
        }
    };

    println!("Run finished: {}", totals);
    Ok(totals.exit_code())
}

fn run_status(prd: PathBuf) -> Result<()> {
    let source = MarkdownSource::new(&prd)?;
    println!(
        "{}: {} task(s) remaining",
        prd.display(),
        source.count_remaining()?
    );
    Ok(())
}

fn run_cleanup() -> Result<()> {
    let workdir = std::env::current_dir()?;
    let git = GitOps::new(&workdir)?;
    let (worktrees, branches) = git.cleanup_stale();
    println!(
        "Pruned {} stale worktree(s), deleted {} leftover branch(es)",
        worktrees, branches
    );
    Ok(())
}
