mod common;
mod logic;
mod storage;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::{Path, PathBuf};
use std::time::Instant;

use common::{expand_all, split_csv};
use logic::{
    GameplayStrategy, LogicTester, PlanSummary, RunPlan, RunRecord, resolve_seed_inputs, summarize,
};
use simadversary_game::{DefenceMaturity, GameConfig, GameEngine, ModeId, SkillLevel};
use storage::{TesterLoader, TesterStore};

#[derive(Debug, Parser)]
#[command(name = "simadversary-tester", version = "0.1.0")]
#[command(about = "Automated play-throughs of SimAdversary scenarios with scripted policies")]
struct Args {
    /// Scenario data directory (defaults to the embedded bundle)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Game configuration JSON overriding the bundled defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scenario modes to run (comma-separated, or `all`)
    #[arg(long, default_value = "all")]
    modes: String,

    /// List the available scenario modes and exit
    #[arg(long)]
    list_modes: bool,

    /// Attacker skill level
    #[arg(long, default_value = "organised_crime")]
    skill: SkillLevel,

    /// Defender maturity
    #[arg(long, default_value = "medium")]
    defence: DefenceMaturity,

    /// Seeds to run (comma-separated; integers, 0x hex or ranges like 1..10)
    #[arg(long, default_value = "1337")]
    seeds: String,

    /// Consecutive seeds played from each listed seed
    #[arg(long, default_value_t = 10)]
    iterations: usize,

    /// Player policies (cautious,bold,balanced,random or `all`)
    #[arg(long, default_value = "balanced")]
    policies: String,

    /// Upper bound on engine operations per session
    #[arg(long, default_value_t = 400)]
    max_operations: usize,

    /// Logical seconds to advance the clock after each operation (0 disables)
    #[arg(long, default_value_t = 0)]
    clock_step_secs: u64,

    /// Output report format
    #[arg(long, default_value = "console")]
    #[arg(value_parser = ["json", "markdown", "console", "csv"])]
    report: String,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// JSON Lines file collecting finished path logs (in memory when omitted)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let loader = TesterLoader::from_dir(args.data_dir.clone());
    if maybe_list_modes(&args, &loader)? {
        return Ok(());
    }

    announce_banner();

    let start_time = Instant::now();
    let config = load_config(args.config.as_deref())?;
    let modes = expand_modes(&args.modes, &loader.modes());
    let strategies = parse_strategies(&args.policies)?;
    let seeds = resolve_seed_inputs(&split_csv(&args.seeds))?;
    println!("📂 Scenarios: {}", loader.describe());

    let store = TesterStore::from_path(args.store.clone());
    let store_location = store.location().map(Path::to_path_buf);
    let tester = LogicTester::new(GameEngine::with_config(loader, store, config), args.verbose);

    let plans = build_plans(&args, &modes, &strategies);
    let (summaries, records) = run_plans(&tester, &plans, &seeds, args.iterations).await;

    write_reports(&args, &summaries, &records, start_time)?;

    let stored = tester.engine().list_records()?.len();
    match store_location {
        Some(path) => println!("💾 {stored} path logs in {}", path.display()),
        None => println!("💾 {stored} path logs kept in memory"),
    }

    if records.iter().any(|r| r.error.is_some()) {
        std::process::exit(1);
    }

    Ok(())
}

fn maybe_list_modes(args: &Args, loader: &TesterLoader) -> Result<bool> {
    if !args.list_modes {
        return Ok(false);
    }
    let mut output_target = OutputTarget::new(args.output.clone())?;
    writeln!(output_target.writer(), "Available modes ({}):", loader.describe())?;
    for mode in loader.modes() {
        writeln!(output_target.writer(), "  {mode}")?;
    }
    output_target.flush_inner()?;
    Ok(true)
}

fn announce_banner() {
    println!("{}", "🛡️ SimAdversary Automated Tester".bright_cyan().bold());
    println!("{}", "================================".cyan());
}

fn load_config(path: Option<&Path>) -> Result<GameConfig> {
    let Some(path) = path else {
        return Ok(GameConfig::load_from_static());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    GameConfig::from_json(&json)
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

fn expand_modes(modes_arg: &str, known: &[String]) -> Vec<String> {
    expand_all(split_csv(modes_arg), known)
        .into_iter()
        .filter(|mode| {
            let found = known.contains(mode);
            if !found {
                eprintln!("⚠️  Unknown mode: {}", mode.yellow());
            }
            found
        })
        .collect()
}

fn parse_strategies(policies_arg: &str) -> Result<Vec<GameplayStrategy>> {
    let known: Vec<String> = GameplayStrategy::ALL
        .iter()
        .map(|s| s.key().to_string())
        .collect();
    let mut strategies = Vec::new();
    for token in expand_all(split_csv(policies_arg), &known) {
        match token.parse::<GameplayStrategy>() {
            Ok(strategy) if !strategies.contains(&strategy) => strategies.push(strategy),
            Ok(_) => {}
            Err(err) => eprintln!("⚠️  {}", err.yellow()),
        }
    }
    if strategies.is_empty() {
        bail!("No usable policies in `{policies_arg}`");
    }
    Ok(strategies)
}

fn build_plans(args: &Args, modes: &[String], strategies: &[GameplayStrategy]) -> Vec<RunPlan> {
    modes
        .iter()
        .flat_map(|mode| {
            strategies.iter().map(move |&strategy| RunPlan {
                mode: ModeId::new(mode),
                strategy,
                skill: args.skill,
                defence: args.defence,
                max_operations: args.max_operations,
                clock_step_secs: args.clock_step_secs,
            })
        })
        .collect()
}

async fn run_plans(
    tester: &LogicTester<TesterStore>,
    plans: &[RunPlan],
    seeds: &[u64],
    iterations: usize,
) -> (Vec<PlanSummary>, Vec<RunRecord>) {
    println!("{}", "🧠 Running Simulations".bright_yellow().bold());
    println!("{}", "-".repeat(30).yellow());

    let mut summaries = Vec::with_capacity(plans.len());
    let mut records = Vec::new();
    for plan in plans {
        let plan_records = tester.run_plan(plan, seeds, iterations).await;
        summaries.push(summarize(plan, &plan_records));
        records.extend(plan_records);
    }
    (summaries, records)
}

fn write_reports(
    args: &Args,
    summaries: &[PlanSummary],
    records: &[RunRecord],
    start_time: Instant,
) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;

    match args.report.as_str() {
        "json" => logic::reports::generate_json_report(&mut output_target, summaries, records)?,
        "markdown" => {
            if summaries.is_empty() {
                writeln!(
                    &mut output_target,
                    "# SimAdversary Simulation Results\n\n_No plans executed._"
                )?;
            } else {
                logic::reports::generate_markdown_report(&mut output_target, summaries)?;
            }
        }
        "csv" => logic::reports::generate_csv_report(&mut output_target, records)?,
        _ => {
            if summaries.is_empty() {
                writeln!(&mut output_target, "No simulations executed.")?;
            } else {
                logic::reports::generate_console_report(
                    &mut output_target,
                    summaries,
                    records,
                    start_time.elapsed(),
                )?;
            }
        }
    }

    output_target.flush_inner()?;
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}
