use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use plansync::connectivity::StaticProbe;
use plansync::{logging, Config, PlanClient};

#[derive(Parser, Debug)]
#[command(name = "plansync")]
#[command(about = "Local-first cache and offline sync for a project-management backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/plansync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Treat the backend as unreachable: read from cache, queue writes
  #[arg(long, global = true)]
  offline: bool,

  /// Log to stderr instead of the log file
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity, queued changes and last sync time
  #[command(visible_alias = "st")]
  Status,
  /// Replay queued changes and refresh the cache
  Sync,
  /// List or discard queued changes
  #[command(visible_alias = "q")]
  Queue {
    /// Drop every queued change without replaying it
    #[arg(long)]
    clear: bool,
  },
  /// List projects
  #[command(visible_alias = "p")]
  Projects,
  /// List the tasks of a project
  #[command(visible_alias = "t")]
  Tasks { project_id: String },
  /// List notifications of the configured user
  #[command(visible_alias = "n")]
  Notifications,
  /// Mark all notifications as read
  ReadAll,
  /// Change the UI theme
  Theme { theme: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;
  let client = if args.offline {
    PlanClient::with_probe(&config, Arc::new(StaticProbe::new(false)))?
  } else {
    PlanClient::new(&config)?
  };

  run(&client, args.command).await
}

async fn run(client: &PlanClient, command: Command) -> Result<()> {
  match command {
    Command::Status => {
      let status = client.status().await?;
      println!("online:          {}", status.online);
      println!("pending changes: {}", status.pending_changes);
      println!("syncing:         {}", status.is_syncing);
      match status.last_synced {
        Some(at) => println!("last synced:     {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("last synced:     never"),
      }
      if let Some(theme) = status.pending_theme {
        println!("pending theme:   {}", theme);
      }
    }
    Command::Sync => {
      let report = client.sync().await?;
      println!("{}", report);
      if report.is_skipped() {
        return Ok(());
      }
      for (temp, canonical) in &report.remapped {
        println!("  {} -> {}", temp, canonical);
      }
    }
    Command::Queue { clear } => {
      if clear {
        client.discard_pending_changes()?;
        println!("Queue cleared");
        return Ok(());
      }
      let changes = client.pending_changes()?;
      if changes.is_empty() {
        println!("No pending changes");
      }
      for change in changes {
        let error = change.last_error.as_deref().unwrap_or("");
        println!(
          "{:<28} {:<14} {:<20} {:<24} retries={} {}",
          change.id,
          change.operation.to_string(),
          change.table_name.to_string(),
          change.record_id,
          change.retry_count,
          error
        );
      }
    }
    Command::Projects => {
      for project in client.projects.list().await? {
        println!("{:<38} {:>3}%  {}", project.id, project.progress, project.name);
      }
    }
    Command::Tasks { project_id } => {
      for task in client.tasks.list_in(&project_id).await? {
        println!("{:<38} {:<12} {}", task.id, task.status, task.title);
      }
    }
    Command::Notifications => {
      for notification in client.my_notifications().await? {
        let marker = if notification.read { " " } else { "*" };
        println!("{} {}", marker, notification.title);
      }
    }
    Command::ReadAll => {
      client.mark_all_notifications_read().await?;
      println!("All notifications marked read");
    }
    Command::Theme { theme } => {
      client.set_theme(&theme).await?;
      match client.preferences.pending_theme()? {
        Some(_) => println!("Theme saved, will be applied on next sync"),
        None => println!("Theme updated"),
      }
    }
  }
  Ok(())
}
