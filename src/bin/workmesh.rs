//! workmesh CLI: operator interface to one peer's scheduling state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use workmesh::clock::ClockHead;
use workmesh::config::Config;
use workmesh::coordinator::WorkflowCoordinator;
use workmesh::engine::{ControlConfig, ControlPlane};
use workmesh::hash::Hash;
use workmesh::model::{PeerId, WorkflowFilter, WorkflowId, WorkflowRecord, WorkflowStatus, WorkflowTask};
use workmesh::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "workmesh", about = "Leaderless workflow scheduling")]
struct Cli {
    /// TOML config file (otherwise WORKMESH_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the poll loop until Ctrl-C
    Serve {
        /// Override the configured poll interval (seconds)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },
    /// Submit a parsed workflow record (JSON file)
    Submit {
        record: PathBuf,
        /// Priority (lower = more urgent); defaults to the record's own
        #[arg(long)]
        priority: Option<f64>,
    },
    /// Assign all pending workflows
    Assign,
    /// List workflows
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<WorkflowStatus>,
        /// Filter by assigned peer
        #[arg(long)]
        peer: Option<String>,
        /// Only workflows assigned to this peer
        #[arg(long, conflicts_with = "peer")]
        mine: bool,
    },
    /// Show a workflow
    Show { id: String },
    /// Move a workflow to a new status
    Update {
        id: String,
        status: WorkflowStatus,
        /// Result JSON (completed)
        #[arg(long)]
        result: Option<String>,
        /// Error message (failed / cancelled)
        #[arg(long)]
        error: Option<String>,
    },
    /// Lower a pending workflow's priority value
    Reprioritize { id: String, priority: f64 },
    /// Peer set operations
    Peer {
        #[command(subcommand)]
        action: PeerAction,
    },
    /// Merkle clock operations
    Clock {
        #[command(subcommand)]
        action: ClockAction,
    },
    /// Counts by status and peer
    Stats,
    /// Rank peers for a workflow against the current clock head
    Explain { id: String },
}

#[derive(Subcommand)]
enum PeerAction {
    Add { peer: String },
    Remove { peer: String },
    List,
}

#[derive(Subcommand)]
enum ClockAction {
    /// Print the local clock head
    Show,
    /// Merge a remote peer's clock head
    Merge { logical_clock: u64, head: String },
    /// Re-verify the hash chain
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    if let Command::Serve { interval } = cli.command {
        return cmd_serve(config, interval).await;
    }

    let coordinator = open(&config)?;
    let mutated = run_command(&coordinator, cli.command)?;
    if mutated && coordinator.state_path().is_some() {
        coordinator.close()?;
    }
    Ok(())
}

fn open(config: &Config) -> anyhow::Result<WorkflowCoordinator> {
    let opened = WorkflowCoordinator::open(&config.coordinator_config())?;
    if let Some(err) = &opened.corruption {
        eprintln!("warning: {err}");
        if let Some(moved) = &opened.quarantined {
            eprintln!("warning: untrusted state moved to {}", moved.display());
        }
        eprintln!("warning: starting from a fresh genesis clock");
    }
    Ok(opened.coordinator)
}

/// Returns whether state changed and should be saved.
fn run_command(coordinator: &WorkflowCoordinator, command: Command) -> anyhow::Result<bool> {
    match command {
        Command::Serve { .. } => unreachable!("handled in main"),
        Command::Submit { record, priority } => {
            let content = std::fs::read_to_string(&record)
                .with_context(|| format!("reading {}", record.display()))?;
            let record: WorkflowRecord = serde_json::from_str(&content)?;
            let priority = priority.unwrap_or(record.priority);
            let id = coordinator.submit_workflow(&record, priority)?;
            println!("Submitted: {id} ({}, priority {priority})", record.name);
            Ok(true)
        }
        Command::Assign => {
            let report = coordinator.assign_workflows();
            for a in &report.assigned {
                let mark = if a.local { " (local)" } else { "" };
                println!("{} -> {}{mark}", a.workflow_id, a.peer_id);
            }
            for d in &report.deferred {
                println!("{} deferred: {}", d.workflow_id, d.reason);
            }
            println!(
                "\n{} assigned, {} deferred at head {}",
                report.assigned.len(),
                report.deferred.len(),
                report.clock_head
            );
            Ok(true)
        }
        Command::List { status, peer, mine } => {
            let mut filter = WorkflowFilter::default();
            if let Some(status) = status {
                filter = filter.status(status);
            }
            if mine {
                filter = filter.peer(coordinator.peer_id().clone());
            } else if let Some(peer) = peer {
                filter = filter.peer(peer);
            }
            print_list(&coordinator.list_workflows(&filter));
            Ok(false)
        }
        Command::Show { id } => {
            let id = resolve_id(coordinator, &id)?;
            print_task(&coordinator.get_workflow_status(&id)?)?;
            Ok(false)
        }
        Command::Update {
            id,
            status,
            result,
            error,
        } => {
            let id = resolve_id(coordinator, &id)?;
            let result = result
                .map(|json| serde_json::from_str::<serde_json::Value>(&json))
                .transpose()
                .context("--result must be valid JSON")?;
            let task = coordinator.update_workflow_status(&id, status, result, error)?;
            println!("{}: {}", task.workflow_id, task.status);
            Ok(true)
        }
        Command::Reprioritize { id, priority } => {
            let id = resolve_id(coordinator, &id)?;
            coordinator.reprioritize_workflow(&id, priority)?;
            println!("{id}: priority {priority}");
            Ok(true)
        }
        Command::Peer { action } => match action {
            PeerAction::Add { peer } => {
                let added = coordinator.add_peer(peer.as_str());
                println!("{peer}: {}", if added { "added" } else { "already known" });
                Ok(added)
            }
            PeerAction::Remove { peer } => {
                let removed = coordinator.remove_peer(&PeerId::new(peer.clone()));
                println!("{peer}: {}", if removed { "removed" } else { "not known" });
                Ok(removed)
            }
            PeerAction::List => {
                for peer in coordinator.peers() {
                    let me = if &peer == coordinator.peer_id() { " (self)" } else { "" };
                    println!("{peer}{me}");
                }
                Ok(false)
            }
        },
        Command::Clock { action } => match action {
            ClockAction::Show => {
                let head = coordinator.clock_head();
                println!("{} {}", head.logical_clock, head.head);
                Ok(false)
            }
            ClockAction::Merge { logical_clock, head } => {
                let head = Hash::from_hex(&head)?;
                let merged = coordinator.merge_clock(ClockHead { logical_clock, head })?;
                println!("{} {}", merged.logical_clock, merged.head);
                Ok(true)
            }
            ClockAction::Verify => {
                coordinator.verify_clock()?;
                println!("chain ok");
                Ok(false)
            }
        },
        Command::Stats => {
            let stats = coordinator.get_stats();
            println!("Peer:       {}", stats.peer_id);
            println!("Clock:      {} ({})", stats.logical_clock, stats.clock_head);
            println!("Peers:      {}", stats.known_peers);
            println!("Workflows:  {}", stats.total);
            for (status, count) in &stats.by_status {
                println!("  {status:<12} {count}");
            }
            if !stats.per_peer.is_empty() {
                println!("Assigned per peer:");
                for (peer, count) in &stats.per_peer {
                    println!("  {peer:<20} {count}");
                }
            }
            Ok(false)
        }
        Command::Explain { id } => {
            let id = resolve_id(coordinator, &id)?;
            for (rank, (peer, distance)) in coordinator.explain_assignment(&id)?.iter().enumerate() {
                println!("{:>3}. {peer:<20} distance {distance}", rank + 1);
            }
            Ok(false)
        }
    }
}

async fn cmd_serve(config: Config, interval: Option<u64>) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "workmesh".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let coordinator = Arc::new(open(&config)?);
    let poll_interval = interval.map(Duration::from_secs).unwrap_or(config.poll_interval);

    let (tx, mut rx) = mpsc::unbounded_channel::<WorkflowTask>();
    let control = ControlPlane::new(
        Arc::clone(&coordinator),
        ControlConfig {
            poll_interval,
            ..ControlConfig::default()
        },
    )
    .with_dispatch(tx);

    // Execution is external; surface ready work for whoever picks it up.
    tokio::spawn(async move {
        while let Some(task) = rx.recv().await {
            println!("ready: {} ({})", task.workflow_id, task.name);
        }
    });

    let ctrl = control.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    control.run().await?;
    Ok(())
}

/// Accept a full workflow id or a unique prefix.
fn resolve_id(coordinator: &WorkflowCoordinator, id: &str) -> anyhow::Result<WorkflowId> {
    let exact = WorkflowId::from(id);
    if coordinator.get_workflow_status(&exact).is_ok() {
        return Ok(exact);
    }
    let matches: Vec<WorkflowId> = coordinator
        .list_workflows(&WorkflowFilter::default())
        .into_iter()
        .map(|t| t.workflow_id)
        .filter(|wid| wid.as_str().starts_with(id))
        .collect();
    match matches.len() {
        0 => anyhow::bail!("no workflow matching '{id}'"),
        1 => Ok(matches[0].clone()),
        n => anyhow::bail!("{n} workflows match prefix '{id}', be more specific"),
    }
}

fn print_list(tasks: &[WorkflowTask]) {
    if tasks.is_empty() {
        println!("No workflows found.");
        return;
    }

    println!(
        "{:<22}  {:<20}  {:<11}  {:>8}  {:<16}  SUBMITTED",
        "ID", "NAME", "STATUS", "PRI", "PEER"
    );
    println!("{}", "-".repeat(100));

    for task in tasks {
        let name: String = task.name.chars().take(20).collect();
        println!(
            "{:<22}  {:<20}  {:<11}  {:>8.2}  {:<16}  {}",
            short_id(&task.workflow_id),
            name,
            task.status,
            task.priority,
            task.assigned_peer.as_ref().map_or("-", |p| p.as_str()),
            task.submitted_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} workflow(s)", tasks.len());
}

fn short_id(id: &WorkflowId) -> &str {
    let s = id.as_str();
    s.get(..22).unwrap_or(s)
}

fn print_task(task: &WorkflowTask) -> anyhow::Result<()> {
    println!("ID:         {}", task.workflow_id);
    println!("Name:       {}", task.name);
    println!("Status:     {}", task.status);
    println!("Priority:   {}", task.priority);
    println!("Task Hash:  {}", task.task_hash);
    println!(
        "Peer:       {}",
        task.assigned_peer.as_ref().map_or("-", |p| p.as_str())
    );
    println!("Submitted:  {}", task.submitted_at);
    if let Some(ref result) = task.result {
        println!("Result:     {}", serde_json::to_string_pretty(result)?);
    }
    if let Some(ref error) = task.error {
        println!("Error:      {error}");
    }
    Ok(())
}
