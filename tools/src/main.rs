//! ops-runner: headless demo driver for the cross-source risk pipeline.
//!
//! Usage:
//!   ops-runner --seed 12345 --customers 200 --waves 3 --db run.db
//!
//! Seeds both change logs with a synthetic population, runs refresh
//! waves through the scheduler, and prints the operator surfaces.

use anyhow::Result;
use crossrisk_core::{
    changelog::{ChangeOp, RecordSnapshot, SqliteChangeLog},
    clock::Clock,
    fraud::ActivityTier,
    scheduler::Scheduler,
    store::{Store, SEGMENT_TABLE},
    types::SourceId,
};
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::env;

const AGE_BANDS: &[&str] = &["18-24", "25-34", "35-44", "45-54", "55-64", "65+"];
const REGIONS: &[&str] = &["Northeast", "Southeast", "Midwest", "West"];
const OCCUPATIONS: &[&str] = &[
    "Technology",
    "Healthcare",
    "Finance",
    "Education",
    "Manufacturing",
    "Retail",
];
const TIERS: &[ActivityTier] = &[
    ActivityTier::Low,
    ActivityTier::Moderate,
    ActivityTier::High,
    ActivityTier::Critical,
];

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let customers = parse_arg(&args, "--customers", 200usize);
    let waves = parse_arg(&args, "--waves", 3u64);
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");

    println!("crossrisk — ops-runner");
    println!("  seed:      {seed}");
    println!("  customers: {customers}");
    println!("  waves:     {waves}");
    println!("  db:        {db}");
    println!();

    // For :memory: use the shared-memory URI so the scheduler's per-job
    // connections all see the same database.
    let store = if db == ":memory:" {
        Store::shared_memory(&format!("opsrun_{}", unix_now()))?
    } else {
        Store::open(db)?
    };
    store.migrate()?;

    let clock = Clock::wall();
    let feed = SqliteChangeLog::new(store.reopen()?);
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let mut scheduler = Scheduler::build(&store, clock)?;

    for wave in 1..=waves {
        if wave == 1 {
            seed_population(&feed, &mut rng, customers, clock)?;
        } else {
            churn_population(&feed, &mut rng, customers, clock)?;
        }

        let outcome = scheduler.run_wave()?;
        println!(
            "wave {}: {} job(s) executed",
            outcome.wave,
            outcome.executed.len()
        );
        for (name, state) in &outcome.executed {
            println!("  {:<24} {}", name, state.as_str());
        }
        println!();
    }

    print_summary(&store, &scheduler)?;
    Ok(())
}

/// Push an initial insert for every customer into both feeds. A slice of
/// the population is bank-only so the join has unmatched keys.
fn seed_population(
    feed: &SqliteChangeLog,
    rng: &mut Pcg64Mcg,
    customers: usize,
    clock: Clock,
) -> Result<()> {
    for i in 0..customers {
        let key = format!("cust-{i:05}");
        let bank = random_record(rng, &key);
        feed.push(SourceId::Bank, ChangeOp::Insert, &bank, clock.now())?;

        // ~90% overlap between the two record sets.
        if rng.next_u64() % 10 != 0 {
            let mut ins = random_record(rng, &key);
            ins.age_band = bank.age_band.clone();
            ins.region = bank.region.clone();
            ins.occupation_band = bank.occupation_band.clone();
            feed.push(SourceId::Insurance, ChangeOp::Insert, &ins, clock.now())?;
        }
    }
    println!("seeded {customers} customer(s) into both change logs");
    Ok(())
}

/// Follow-up waves: re-score ~10% of the population on the banking side.
fn churn_population(
    feed: &SqliteChangeLog,
    rng: &mut Pcg64Mcg,
    customers: usize,
    clock: Clock,
) -> Result<()> {
    let updates = (customers / 10).max(1);
    for _ in 0..updates {
        let i = (rng.next_u64() % customers.max(1) as u64) as usize;
        let key = format!("cust-{i:05}");
        let record = random_record(rng, &key);
        feed.push(SourceId::Bank, ChangeOp::Update, &record, clock.now())?;
    }
    log::debug!("pushed {updates} update event(s) into the banking feed");
    Ok(())
}

fn random_record(rng: &mut Pcg64Mcg, key: &str) -> RecordSnapshot {
    let pick = |rng: &mut Pcg64Mcg, n: usize| (rng.next_u64() % n as u64) as usize;
    RecordSnapshot {
        customer_key: key.to_string(),
        age_band: AGE_BANDS[pick(rng, AGE_BANDS.len())].to_string(),
        region: REGIONS[pick(rng, REGIONS.len())].to_string(),
        occupation_band: OCCUPATIONS[pick(rng, OCCUPATIONS.len())].to_string(),
        risk_score: (rng.next_u64() % 10_000) as f64 / 100.0,
        fraud_flags: if rng.next_u64() % 20 == 0 { 1 } else { 0 },
        activity_tier: TIERS[pick(rng, TIERS.len())],
    }
}

fn print_summary(store: &Store, scheduler: &Scheduler) -> Result<()> {
    let overview = store.overview()?;
    println!("=== PLATFORM OVERVIEW ===");
    println!("  segments:        {}", overview.total_segments);
    println!("  customers:       {}", overview.total_customers);
    println!("  avg composite:   {:.1}", overview.avg_composite);
    println!("  high-risk:       {}", overview.high_risk_customers);
    if let Some(at) = store.last_refreshed(SEGMENT_TABLE)? {
        println!("  last refreshed:  {at}");
    }

    println!();
    println!("=== RISK DISTRIBUTION ===");
    for (category, segments, cust) in store.category_distribution()? {
        println!("  {category:<10} {segments:>4} segment(s) {cust:>6} customer(s)");
    }

    println!();
    println!("=== JOB STATUS ===");
    for job in scheduler.status()? {
        println!(
            "  {:<24} {:<10} last_run: {}",
            job.name,
            job.state.as_str(),
            job.last_run
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
        );
        if let Some(err) = &job.last_error {
            println!("    last_error: {err}");
        }
    }

    let health = scheduler.health()?;
    println!();
    println!("=== HEALTH ===");
    println!("  status:          {:?}", health.status);
    println!("  failed jobs:     {}", health.failed_jobs);
    println!("  fraud signals:   {}", health.fraud_signals);

    let signals = store.fraud_signals()?;
    if !signals.is_empty() {
        println!();
        println!("=== FRAUD SIGNALS (latest 10) ===");
        for s in signals.iter().take(10) {
            println!(
                "  {} / {} / {} | {} ({:.2}) affecting {}",
                s.age_band, s.region, s.occupation_band, s.pattern, s.confidence, s.affected_count
            );
        }
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
