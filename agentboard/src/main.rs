//! agentboard - terminal client for the agent task board
//!
//! This tool provides commands for:
//! - Showing the resolved configuration
//! - Printing which actions each task status offers
//! - Fetching a task snapshot
//! - Following a task's live event stream
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/agentboard/config.toml (~/.config/agentboard/config.toml)
//! - Logs: $XDG_STATE_HOME/agentboard/ (~/.local/state/agentboard/)

mod watch;

use agentboard_core::format::{format_actions, format_relative_time};
use agentboard_core::{actions_for, available_actions, Config, TaskClient, TaskStatus};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agentboard")]
#[command(about = "Follow coding-agent tasks from the terminal")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the resolved configuration
    Status,

    /// Show the actions offered in a status (all statuses when omitted)
    Actions {
        /// Task status, e.g. `pending_approval`
        status: Option<TaskStatus>,

        /// Assume the task has a pull request
        #[arg(long)]
        pr: bool,
    },

    /// Fetch a task snapshot
    Task {
        /// Task id
        id: String,
    },

    /// Follow a task's live events until it finishes
    Watch {
        /// Task id
        id: String,

        /// Do not re-fetch the snapshot while the agent is working
        #[arg(long)]
        no_poll: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        agentboard_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Actions { status, pr } => cmd_actions(status, pr),
        Command::Task { id } => cmd_task(&config, &id),
        Command::Watch { id, no_poll } => watch::run(&config, &id, !no_poll),
    }
}

/// Single-threaded runtime; all stream work is I/O callbacks and timers.
fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Agentboard Configuration");
    println!("========================");
    println!();

    println!("Config file:     {}", Config::config_path().display());
    println!("Log directory:   {}", Config::state_dir().display());
    println!();

    let server = &config.server;
    println!("Server URL:      {}", server.base_url());
    println!(
        "Auth token:      {}",
        if server.auth_token().is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Timeout:         {}s", server.timeout_secs);
    println!();

    let stream = &config.stream;
    println!("Reconnect delay: {}s", stream.reconnect_delay_secs);
    match stream.attempt_cap() {
        Some(cap) => println!("Max reconnects:  {}", cap),
        None => println!("Max reconnects:  unlimited"),
    }
    println!("Poll interval:   {}s", stream.poll_interval_secs);
    println!();

    println!("Log level:       {}", config.logging.level);

    Ok(())
}

fn cmd_actions(status: Option<TaskStatus>, has_pr: bool) -> Result<()> {
    let statuses = match status {
        Some(status) => vec![status],
        None => TaskStatus::ALL.to_vec(),
    };

    println!("{:<18} {:<9} {:<9} ACTIONS", "STATUS", "PHASE", "KIND");
    for status in statuses {
        let kind = if status.is_terminal() {
            "terminal"
        } else if status.is_active() {
            "active"
        } else {
            "editable"
        };
        println!(
            "{:<18} {:<9} {:<9} {}",
            status.as_str(),
            status.phase().as_str(),
            kind,
            format_actions(&actions_for(status, has_pr))
        );
    }

    Ok(())
}

fn cmd_task(config: &Config, id: &str) -> Result<()> {
    let client = TaskClient::new(&config.server).context("failed to create task client")?;
    let task = runtime()?
        .block_on(client.get_task(id))
        .with_context(|| format!("failed to fetch task {}", id))?;

    println!("Task:      {}", task.id);
    if !task.title.is_empty() {
        println!("Title:     {}", task.title);
    }
    println!("Status:    {} ({})", task.status, task.status.phase().as_str());
    println!("Updated:   {}", format_relative_time(task.updated_at));
    if let Some(agent) = &task.agent_type {
        match &task.agent_model {
            Some(model) => println!("Agent:     {} ({})", agent, model),
            None => println!("Agent:     {}", agent),
        }
    }
    if let Some(pr_url) = task.pr_url.as_deref().filter(|url| !url.is_empty()) {
        println!("PR:        {}", pr_url);
    }
    if let Some(error) = &task.error {
        println!("Error:     {}", error);
    }
    println!("Actions:   {}", format_actions(&available_actions(&task)));

    Ok(())
}
