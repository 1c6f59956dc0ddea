use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use tasktree::config::Config;
use tasktree::orchestration::{Async, ThreadPool};
use tasktree::tasking::{parallel, sequential, workflow_policy, Group, GroupItem, WorkflowPolicy};
use tasktree::{ttlog, Result, TaskTree, TreeEvent};

/// tasktree - run a declarative task tree from the command line
#[derive(Parser, Debug)]
#[command(name = "tasktree")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TASKTREE_DEBUG=1            Enable debug logging\n    TASKTREE_WORKER_THREADS=N   Size of the default worker pool")]
pub struct Cli {
    /// Write the engine log to this file
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Configuration file (TOML)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run one group of simulated steps with scripted outcomes
    Run {
        /// Outcome of each step in declared order (1/0, true/false)
        #[arg(long, value_delimiter = ',', default_value = "1,1,1")]
        outcomes: Vec<String>,

        /// Workflow policy of the group
        #[arg(long, default_value = "stop-on-error")]
        policy: WorkflowPolicy,

        /// Start all steps at once instead of one after another
        #[arg(long)]
        parallel: bool,

        /// How long each step takes on its worker thread
        #[arg(long, default_value_t = 50)]
        delay_ms: u64,

        /// Worker pool size (overrides the configuration)
        #[arg(long)]
        threads: Option<usize>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print how each workflow policy folds child outcomes
    Policies,
}

fn parse_outcome(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "ok" | "done" => Some(true),
        "0" | "false" | "fail" | "error" => Some(false),
        _ => None,
    }
}

/// File configuration, then environment, then command-line flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    }
    .apply_env();
    config.debug |= cli.debug;
    if let Command::Run {
        threads: Some(threads),
        ..
    } = &cli.command
    {
        config.worker_threads = Some(*threads);
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Some(path) = &cli.log {
        tasktree::log::init_with_debug(path, config.debug);
    }

    match cli.command {
        Command::Run {
            outcomes,
            policy,
            parallel: run_parallel,
            delay_ms,
            json,
            ..
        } => run_steps(&config, &outcomes, policy, run_parallel, delay_ms, json),
        Command::Policies => {
            print_policies();
            Ok(())
        }
    }
}

fn run_steps(
    config: &Config,
    outcomes: &[String],
    policy: WorkflowPolicy,
    run_parallel: bool,
    delay_ms: u64,
    json: bool,
) -> Result<()> {
    let mut parsed = Vec::with_capacity(outcomes.len());
    for value in outcomes.iter().filter(|v| !v.trim().is_empty()) {
        match parse_outcome(value) {
            Some(outcome) => parsed.push(outcome),
            None => {
                eprintln!("Invalid outcome {:?}, expected 1/0 or true/false", value);
                std::process::exit(2);
            }
        }
    }

    let pool = ThreadPool::with_config(config)?;
    let delay = Duration::from_millis(delay_ms);

    let mut items: Vec<GroupItem> = vec![
        if run_parallel { parallel() } else { sequential() },
        workflow_policy(policy),
    ];
    for (index, outcome) in parsed.into_iter().enumerate() {
        let pool = pool.clone();
        let step = Async::<bool>::new(move |task| {
            task.set_thread_pool(pool.clone());
            task.set_concurrent_call_with_promise(move |promise| {
                std::thread::sleep(delay);
                promise.add_result(outcome);
                if !outcome {
                    promise.cancel();
                }
            });
        })
        .on_done(move |_| {
            if !json {
                println!("  step {} done", index);
            }
        })
        .on_error(move |_| {
            if !json {
                println!("  step {} failed", index);
            }
        });
        items.push(step.into());
    }

    let tree = TaskTree::new(Group::new(items));
    let events = tree.subscribe();
    ttlog!("Running {} steps with policy {}", tree.task_count(), policy);

    if !json {
        println!(
            "Running {} steps ({}, {})",
            tree.task_count(),
            if run_parallel { "parallel" } else { "sequential" },
            policy
        );
    }

    let success = tree.run()?;

    for event in events.try_iter() {
        if json {
            println!("{}", serde_json::to_string(&event).unwrap_or_default());
        } else if let TreeEvent::ProgressChanged(value) = event {
            println!("  progress {}/{}", value, tree.task_count());
        }
    }

    if !json {
        println!("Result: {}", if success { "done" } else { "error" });
    }
    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_policies() {
    println!(
        "{:<20} {:<8} {:<8} {}",
        "POLICY", "INITIAL", "FOLD", "STOPS ON"
    );
    for policy in WorkflowPolicy::ALL {
        let fold = match policy {
            WorkflowPolicy::StopOnError | WorkflowPolicy::ContinueOnError => "AND",
            WorkflowPolicy::StopOnDone | WorkflowPolicy::ContinueOnDone => "OR",
            WorkflowPolicy::Optional => "-",
        };
        let stops = match (policy.stops_on(true), policy.stops_on(false)) {
            (true, _) => "first success",
            (_, true) => "first failure",
            _ => "never",
        };
        println!(
            "{:<20} {:<8} {:<8} {}",
            policy.to_string(),
            policy.initial_success_bit(),
            fold,
            stops
        );
    }
}
