use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use pulseboard::api::Operation;
use pulseboard::api::types::Summary;
use pulseboard::cache::QueryState;
use pulseboard::config::Config;
use pulseboard::{logging, Dashboard};

#[derive(Parser, Debug)]
#[command(name = "pulseboard")]
#[command(about = "Cached, live-updating client for the e-commerce analytics dashboard API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pulseboard/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Backend base URL, overriding the config file
  #[arg(long)]
  base_url: Option<String>,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Fetch one operation and print its JSON payload
  Fetch {
    operation: Operation,
    /// Query string sent verbatim, e.g. "period=week&salesType=fbo"
    #[arg(default_value = "")]
    params: String,
  },
  /// Print the headline summary
  Summary {
    #[arg(default_value = "period=week")]
    params: String,
  },
  /// Follow the summary live until interrupted
  Watch {
    #[arg(default_value = "period=week")]
    params: String,
  },
  /// Show or change the custom expenses applied to profit figures
  Expenses {
    #[command(subcommand)]
    action: ExpensesAction,
  },
}

#[derive(Subcommand, Debug)]
enum ExpensesAction {
  Get,
  Set { value: f64 },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(base_url) = args.base_url {
    config.api.base_url = base_url;
  }

  let _guard = logging::init(config.environment, &Config::data_dir()?.join("logs"))?;

  let dashboard = Dashboard::new(config)?;
  let result = run(&dashboard, args.command).await;
  dashboard.shutdown().await;
  result
}

async fn run(dashboard: &Dashboard, command: Cmd) -> Result<()> {
  match command {
    Cmd::Fetch { operation, params } => {
      let result = dashboard
        .api()
        .read::<serde_json::Value>(operation, &params)
        .await?;
      println!("{}", serde_json::to_string_pretty(&*result.data)?);
    }
    Cmd::Summary { params } => {
      let summary = dashboard.api().summary(&params).await?;
      print_summary(&summary);
    }
    Cmd::Watch { params } => watch(dashboard, &params).await?,
    Cmd::Expenses { action } => match action {
      ExpensesAction::Get => println!("{:.2}", dashboard.custom_expenses()?),
      ExpensesAction::Set { value } => {
        dashboard.prefs().set_custom_expenses(value)?;
        println!("custom expenses set to {:.2}", value);
      }
    },
  }
  Ok(())
}

async fn watch(dashboard: &Dashboard, params: &str) -> Result<()> {
  dashboard.start();
  let mut summary = dashboard.api().watch::<Summary>(Operation::Summary, params);
  let mut state = dashboard.realtime().watch_state();
  let mut milestones = dashboard.realtime().subscribe_milestones();

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      alive = summary.changed() => {
        if !alive {
          break;
        }
        match summary.state() {
          QueryState::Success(data) => print_summary(&data),
          QueryState::Error(e) => eprintln!("error: {}", e),
          QueryState::Loading | QueryState::Idle => {}
        }
      }
      changed = state.changed() => {
        if changed.is_err() {
          break;
        }
        let current = *state.borrow_and_update();
        eprintln!("live updates: {}", current);
      }
      milestone = milestones.recv() => {
        if let Ok(milestone) = milestone {
          println!("milestone: {}", milestone.message().unwrap_or("(no message)"));
        }
      }
    }
  }
  Ok(())
}

fn print_summary(summary: &Summary) {
  println!(
    "{} .. {}: {} orders, revenue {:.2}, average check {:.2}, returns {} ({:.1}%)",
    summary.start_date,
    summary.end_date,
    summary.total_orders,
    summary.total_revenue,
    summary.avg_check,
    summary.total_returns,
    summary.return_rate
  );
}
