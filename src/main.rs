use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use examsentry::config::ProctorConfig;
use examsentry::db::Database;
use examsentry::storage::FileAttemptStore;
use examsentry::trace::{parse_trace, replay};

fn print_usage() {
    eprintln!("usage: examsentry replay <trace.jsonl> [--config <path>] [--db <path>] [--attempt <id>]");
    eprintln!("       examsentry sessions [--db <path>]");
}

struct Flags {
    config: Option<PathBuf>,
    db: PathBuf,
    attempt: Option<String>,
}

fn parse_flags(args: &[String]) -> Result<Flags> {
    let mut flags = Flags {
        config: None,
        db: PathBuf::from("examsentry.sqlite3"),
        attempt: None,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                flags.config = Some(PathBuf::from(
                    iter.next().context("--config requires a path")?,
                ));
            }
            "--db" => {
                flags.db = PathBuf::from(iter.next().context("--db requires a path")?);
            }
            "--attempt" => {
                flags.attempt = Some(iter.next().context("--attempt requires an id")?.clone());
            }
            other => bail!("unknown flag '{other}'"),
        }
    }
    Ok(flags)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_usage();
        bail!("no command given");
    };

    match command.as_str() {
        "replay" => {
            let Some(trace_path) = args.get(1) else {
                print_usage();
                bail!("replay requires a trace file");
            };
            let flags = parse_flags(&args[2..])?;

            let config = match &flags.config {
                Some(path) => ProctorConfig::load(path)?,
                None => ProctorConfig::default(),
            };

            let contents = std::fs::read_to_string(trace_path)
                .with_context(|| format!("failed to read trace from {trace_path}"))?;
            let events = parse_trace(&contents)?;

            let db = Database::new(flags.db.clone())?;
            let store_path = flags.db.with_extension("attempt_state.json");
            let store = Arc::new(FileAttemptStore::new(store_path)?);
            let attempt_id = flags
                .attempt
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            let summary = replay(&events, config, db, store, &attempt_id, 1001, "Replayed Exam")
                .await?;

            println!("attempt:           {attempt_id}");
            match &summary.session_id {
                Some(id) => println!("session:           {id}"),
                None => println!("session:           (none created)"),
            }
            println!("tab switches:      {}", summary.tab_switch_count);
            println!("force submit:      {}", summary.force_submit_armed);
            println!("form submissions:  {}", summary.form_submissions);
            println!("screenshots:       {}", summary.screenshot_count);
            println!("alerts:            {}", summary.alerts.len());
            for alert in &summary.alerts {
                println!(
                    "  [{}] {} (severity {}): {}",
                    alert.created_at.format("%H:%M:%S"),
                    alert.alert_type,
                    alert.severity,
                    alert.description
                );
            }
        }
        "sessions" => {
            let flags = parse_flags(&args[1..])?;
            let db = Database::new(flags.db)?;
            let sessions = db.list_active_sessions().await?;
            if sessions.is_empty() {
                println!("no active sessions");
            }
            for session in sessions {
                println!(
                    "{}  user {}  {}  started {}  alerts {}",
                    session.session_id,
                    session.user_id,
                    session.exam_name,
                    session.started_at.format("%Y-%m-%d %H:%M:%S"),
                    session.alert_count
                );
            }
        }
        other => {
            print_usage();
            bail!("unknown command '{other}'");
        }
    }

    Ok(())
}
