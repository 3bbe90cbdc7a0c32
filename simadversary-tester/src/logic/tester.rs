use anyhow::{Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use simadversary_game::{
    DefenceMaturity, Ending, GameEngine, ModeId, PathStore, SessionRecord, SkillLevel,
};

use crate::logic::policy::GameplayStrategy;
use crate::logic::simulation::{SimulationConfig, SimulationOutcome, SimulationSession};
use crate::storage::TesterLoader;

/// One mode/strategy combination to run across seeds.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub mode: ModeId,
    pub strategy: GameplayStrategy,
    pub skill: SkillLevel,
    pub defence: DefenceMaturity,
    pub max_operations: usize,
    pub clock_step_secs: u64,
}

impl RunPlan {
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "{} / {} ({} vs {})",
            self.mode,
            self.strategy.label(),
            self.skill,
            self.defence
        )
    }

    fn simulation(&self, seed: u64) -> SimulationConfig {
        SimulationConfig::new(self.mode.clone(), self.strategy, seed)
            .with_skill(self.skill)
            .with_defence(self.defence)
            .with_max_operations(self.max_operations)
            .with_clock_step(self.clock_step_secs)
    }
}

/// Result of one seeded play-through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub mode: String,
    pub strategy: String,
    pub skill: SkillLevel,
    pub defence: DefenceMaturity,
    pub seed: u64,
    pub won: bool,
    pub ending: String,
    pub score: i64,
    pub operations: usize,
    pub steps_taken: usize,
    pub detections: usize,
    pub events: usize,
    pub stalled: bool,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    pub error: Option<String>,
}

impl RunRecord {
    fn failed(plan: &RunPlan, seed: u64, duration: Duration, error: &anyhow::Error) -> Self {
        Self {
            mode: plan.mode.to_string(),
            strategy: plan.strategy.label().to_string(),
            skill: plan.skill,
            defence: plan.defence,
            seed,
            won: false,
            ending: "error".to_string(),
            score: 0,
            operations: 0,
            steps_taken: 0,
            detections: 0,
            events: 0,
            stalled: false,
            duration,
            error: Some(format!("{error:#}")),
        }
    }
}

/// Per-plan statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub plan: String,
    pub mode: String,
    pub strategy: String,
    pub runs: usize,
    pub errors: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub mean_score: f64,
    pub min_score: i64,
    pub max_score: i64,
    pub mean_detections: f64,
    pub mean_events: f64,
    pub stalled: usize,
    #[serde(with = "duration_serde")]
    pub average_duration: Duration,
}

impl PlanSummary {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.errors == 0
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(total: f64, count: usize) -> f64 {
    if count == 0 { 0.0 } else { total / count as f64 }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(plan: &RunPlan, records: &[RunRecord]) -> PlanSummary {
    let played: Vec<&RunRecord> = records.iter().filter(|r| r.error.is_none()).collect();
    let wins = played.iter().filter(|r| r.won).count();
    let score_total: f64 = played.iter().map(|r| r.score as f64).sum();
    let detection_total: f64 = played.iter().map(|r| r.detections as f64).sum();
    let event_total: f64 = played.iter().map(|r| r.events as f64).sum();
    let average_duration = if records.is_empty() {
        Duration::ZERO
    } else {
        records.iter().map(|r| r.duration).sum::<Duration>()
            / u32::try_from(records.len()).unwrap_or(u32::MAX)
    };
    PlanSummary {
        plan: plan.label(),
        mode: plan.mode.to_string(),
        strategy: plan.strategy.label().to_string(),
        runs: records.len(),
        errors: records.len() - played.len(),
        wins,
        win_rate: mean(wins as f64, played.len()),
        mean_score: mean(score_total, played.len()),
        min_score: played.iter().map(|r| r.score).min().unwrap_or(0),
        max_score: played.iter().map(|r| r.score).max().unwrap_or(0),
        mean_detections: mean(detection_total, played.len()),
        mean_events: mean(event_total, played.len()),
        stalled: played.iter().filter(|r| r.stalled).count(),
        average_duration,
    }
}

pub type TesterEngine<S> = GameEngine<TesterLoader, S>;

/// Runs plans across seeds on the tokio blocking pool.
pub struct LogicTester<S: PathStore> {
    engine: Arc<TesterEngine<S>>,
    verbose: bool,
}

impl<S> LogicTester<S>
where
    S: PathStore + Send + Sync + 'static,
    S::Error: Into<anyhow::Error>,
{
    pub fn new(engine: TesterEngine<S>, verbose: bool) -> Self {
        Self {
            engine: Arc::new(engine),
            verbose,
        }
    }

    #[must_use]
    pub fn engine(&self) -> &TesterEngine<S> {
        &self.engine
    }

    /// Run `plan` for every seed, `iterations` times each with consecutive seeds.
    pub async fn run_plan(
        &self,
        plan: &RunPlan,
        seeds: &[u64],
        iterations: usize,
    ) -> Vec<RunRecord> {
        if self.verbose {
            println!("🧪 Running {}", plan.label().bright_white());
        }
        let mut handles = Vec::new();
        for &seed in seeds {
            for i in 0..iterations.max(1) {
                let iteration_seed = seed.wrapping_add(u64::try_from(i).unwrap_or(u64::MAX));
                let engine = Arc::clone(&self.engine);
                let plan = plan.clone();
                handles.push((
                    iteration_seed,
                    tokio::task::spawn_blocking(move || {
                        run_single(&engine, &plan, iteration_seed)
                    }),
                ));
            }
        }

        let mut records = Vec::with_capacity(handles.len());
        for (seed, handle) in handles {
            let record = match handle.await {
                Ok(record) => record,
                Err(err) => RunRecord::failed(
                    plan,
                    seed,
                    Duration::ZERO,
                    &anyhow::Error::new(err).context("simulation task panicked"),
                ),
            };
            if self.verbose {
                print_run(&record);
            }
            records.push(record);
        }
        records
    }
}

fn print_run(record: &RunRecord) {
    match &record.error {
        None => println!(
            "  {} seed {} → {} (score {}, {} ops)",
            if record.won { "✅".green() } else { "➖".yellow() },
            record.seed,
            record.ending,
            record.score,
            record.operations
        ),
        Some(err) => eprintln!("  {} seed {} → {}", "❌".red(), record.seed, err.red()),
    }
}

/// Play one seeded session to the end and persist its record.
pub fn run_single<S>(engine: &TesterEngine<S>, plan: &RunPlan, seed: u64) -> RunRecord
where
    S: PathStore,
    S::Error: Into<anyhow::Error>,
{
    let start = Instant::now();
    match play(engine, plan, seed) {
        Ok((record, outcome)) => RunRecord {
            mode: plan.mode.to_string(),
            strategy: plan.strategy.label().to_string(),
            skill: plan.skill,
            defence: plan.defence,
            seed,
            won: record.won,
            ending: ending_label(outcome.ending),
            score: record.score,
            operations: outcome.operations,
            steps_taken: record.path.len(),
            detections: record.detections(),
            events: record.events.len(),
            stalled: outcome.stalled,
            duration: start.elapsed(),
            error: None,
        },
        Err(err) => {
            log::warn!("{} seed {seed} failed: {err:#}", plan.label());
            RunRecord::failed(plan, seed, start.elapsed(), &err)
        }
    }
}

fn play<S>(
    engine: &TesterEngine<S>,
    plan: &RunPlan,
    seed: u64,
) -> Result<(SessionRecord, SimulationOutcome)>
where
    S: PathStore,
    S::Error: Into<anyhow::Error>,
{
    let config = plan.simulation(seed);
    let setup = config.setup(engine.config());
    let mut session = engine
        .create_session_in_runtime(&setup)
        .with_context(|| format!("starting {}", plan.label()))?;
    let mut policy = plan.strategy.create_policy(seed);
    let outcome = SimulationSession::new(&mut session, &config)
        .run(policy.as_mut())
        .with_context(|| format!("{} rejected a move", policy.name()))?;
    let record = engine.finish_session(session)?;
    Ok((record, outcome))
}

#[must_use]
pub fn ending_label(ending: Ending) -> String {
    match ending {
        Ending::Success => "success".to_string(),
        Ending::Failure { cause } => serde_json::to_value(cause)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{cause:?}")),
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u128::deserialize(deserializer)?;
        Ok(Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
    }
}
