#![deny(warnings)]

//! Headless CLI that plays a scripted session against the economy and
//! flushes the result into SQLite.

use anyhow::{Context, Result};
use persistence::{init_db, init_memory_db, MemoryStore, SqliteSink, SyncWorker};
use std::path::PathBuf;
use std::sync::Arc;
use tap_core::{EconomyConfig, Profile, SystemClock, UpgradeKind, UserId};
use tap_runtime::EconomyService;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    db: Option<String>,
    players: Option<u32>,
    taps: Option<i64>,
    upgrade: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next().map(PathBuf::from),
            "--db" => args.db = it.next(),
            "--players" => args.players = it.next().and_then(|s| s.parse().ok()),
            "--taps" => args.taps = it.next().and_then(|s| s.parse().ok()),
            "--upgrade" => args.upgrade = it.next(),
            _ => {}
        }
    }
    args
}

fn load_config(path: Option<&PathBuf>) -> Result<EconomyConfig> {
    match path {
        Some(p) => EconomyConfig::from_yaml_file(p)
            .with_context(|| format!("loading config {}", p.display())),
        None => Ok(EconomyConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args();
    info!(
        sha = env!("GIT_SHA"),
        built = env!("BUILD_DATE"),
        ?args,
        "starting CLI"
    );

    let cfg = load_config(args.config.as_ref())?;
    let upgrade: UpgradeKind = args
        .upgrade
        .as_deref()
        .unwrap_or("multitap")
        .parse()
        .context("parsing --upgrade")?;
    let sync_cfg = cfg.sync.clone();
    let players = args.players.unwrap_or(3).max(1);
    let taps = args.taps.unwrap_or(50);

    let store = Arc::new(MemoryStore::new());
    let svc = EconomyService::new(Arc::clone(&store), cfg, Arc::new(SystemClock))?;

    // First player invites everyone else.
    let host = UserId(1);
    svc.login(host, Profile::named("Host"))?;
    let code = svc.referral_info(host)?.code;
    for n in 2..=i64::from(players) {
        let profile = Profile::named(format!("Player{n}"));
        svc.login(UserId(n), profile.clone())?;
        svc.process_referral(&code, UserId(n), profile)?;
    }

    for n in 1..=i64::from(players) {
        let user = UserId(n);
        let tapped = svc.tap(user, taps)?;
        match svc.buy_upgrade(user, upgrade) {
            Ok(_) => {}
            Err(e) => warn!(user_id = %user, error = %e, "upgrade skipped"),
        }
        let passive = svc.sync_passive(user)?;
        let progress = svc.level_progress(user)?;
        println!(
            "{} | taps: {}{} | points: {} | energy: {}/{} | passive: +{} | tier: {} ({}%)",
            user,
            tapped.actual_taps,
            if tapped.truncated { " (clamped)" } else { "" },
            passive.points,
            tapped.state.energy,
            tapped.state.max_energy,
            passive.earned,
            progress.name,
            progress.progress_pct
        );
    }

    let info = svc.referral_info(host)?;
    println!("{}", serde_json::to_string_pretty(&info)?);

    let pool = match &args.db {
        Some(url) => init_db(url).await?,
        None => init_memory_db().await?,
    };
    let sink = SqliteSink::new(pool);
    let worker = SyncWorker::new(Arc::clone(&store), sink.clone(), sync_cfg);
    let report = worker.flush_all().await?;
    println!(
        "Sync OK | drained: {} | written: {} | rows: {}",
        report.drained,
        report.written,
        sink.count().await?
    );

    Ok(())
}
