//! Operator command line for the trail match engine.
//!
//! Every command prints its result as JSON on stdout. Logging goes to
//! stderr and is controlled by `RUST_LOG` (default `info`).

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;
use serde::{Deserialize, Serialize};

use trail_matcher::config::parse_since;
use trail_matcher::{
    ActivityRecord, EngineConfig, MatchController, MatchOutcome, MatchStore, RecalculationScope,
    Result, SqliteMatchStore, TrailMatchError,
};

#[derive(Parser, Debug)]
#[command(name = "trailmatch")]
#[command(about = "Match GPS activities against a trail network", long_about = None)]
struct Cli {
    /// JSON engine config file (environment variables override it)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Directory holding the trail GeoJSON resources
    #[arg(long, value_name = "DIR")]
    trail_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store activities from a JSON file (one object or an array)
    Ingest { file: PathBuf },
    /// Run one scheduled pass over unmatched activities
    MatchUnmatched,
    /// Match one activity now
    Match { activity_id: i64 },
    /// Clear match results back to unmatched
    Reset {
        #[arg(long, conflicts_with = "athlete", required_unless_present = "athlete")]
        activity: Option<i64>,
        #[arg(long)]
        athlete: Option<i64>,
    },
    /// Recompute match results for many activities
    Recalculate {
        #[arg(long)]
        athlete: Option<i64>,
        /// RFC 3339 timestamp or YYYY-MM-DD
        #[arg(long)]
        since: Option<String>,
    },
    /// Print renderable on/off trail segments for one activity
    Render {
        activity_id: i64,
        /// Include per-point diagnostics
        #[arg(long)]
        debug: bool,
    },
    /// Describe the loaded trail network
    NetworkInfo,
    /// Download trail resources from the configured sources
    #[cfg(feature = "http")]
    FetchTrails,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IngestFile {
    Many(Vec<ActivityRecord>),
    One(Box<ActivityRecord>),
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("[trailmatch] {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| TrailMatchError::Internal {
        message: format!("could not serialize output: {}", e),
    })?;
    println!("{}", text);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(dir) = cli.trail_dir {
        config.trail_data_dir = dir;
    }

    #[cfg(feature = "http")]
    if let Command::FetchTrails = cli.command {
        let results = trail_matcher::http::fetch_trail_data_sync(&config)?;
        return print_json(&results);
    }

    let store = SqliteMatchStore::open(&config.database_path)?;
    let mut controller = MatchController::from_config(store, &config);

    match cli.command {
        Command::Ingest { file } => {
            let text = fs::read_to_string(&file)?;
            let records = match serde_json::from_str::<IngestFile>(&text)? {
                IngestFile::Many(records) => records,
                IngestFile::One(record) => vec![*record],
            };
            for record in &records {
                controller.ingest(record)?;
            }
            print_json(&serde_json::json!({ "ingested": records.len() }))
        }
        Command::MatchUnmatched => print_json(&controller.match_unmatched()?),
        Command::Match { activity_id } => match controller.match_activity(activity_id)? {
            MatchOutcome::Matched(result) => print_json(&serde_json::json!({
                "activityId": activity_id,
                "status": "matched",
                "result": result,
            })),
            MatchOutcome::Skipped { reason } => print_json(&serde_json::json!({
                "activityId": activity_id,
                "status": "skipped",
                "reason": reason,
            })),
        },
        Command::Reset { activity, athlete } => {
            if let Some(id) = activity {
                controller.reset_activity(id)?;
                print_json(&serde_json::json!({ "reset": 1 }))
            } else if let Some(athlete_id) = athlete {
                let count = controller.reset_athlete(athlete_id)?;
                print_json(&serde_json::json!({ "reset": count }))
            } else {
                Err(TrailMatchError::Config {
                    message: "reset needs --activity or --athlete".to_string(),
                })
            }
        }
        Command::Recalculate { athlete, since } => {
            let mut scope: RecalculationScope = config.recalculation_scope();
            if let Some(raw) = since {
                scope.since = Some(parse_since(&raw)?);
            }
            scope.athlete_id = athlete;
            print_json(&controller.recalculate(&scope)?)
        }
        Command::Render { activity_id, debug } => {
            print_json(&controller.render(activity_id, debug)?)
        }
        Command::NetworkInfo => {
            let network = controller.network();
            print_json(&serde_json::json!({
                "segments": network.segment_count(),
                "edges": network.edge_count(),
                "bounds": network.bounds(),
                "resources": network.reports(),
                "toleranceMeters": controller.config().tolerance_meters,
                "activities": controller.store().activity_count()?,
            }))
        }
        #[cfg(feature = "http")]
        Command::FetchTrails => Ok(()),
    }
}
