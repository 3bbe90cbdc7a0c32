use anyhow::Result;
use colored::Colorize;
use std::io::Write;
use std::time::Duration;

use super::tester::{PlanSummary, RunRecord};

pub fn generate_console_report<W: Write + ?Sized>(
    writer: &mut W,
    summaries: &[PlanSummary],
    records: &[RunRecord],
    total_duration: Duration,
) -> Result<()> {
    writeln!(writer)?;
    writeln!(writer, "{}", "📊 Simulation Results Summary".bright_cyan().bold())?;
    writeln!(writer, "{}", "=============================".cyan())?;

    let total_runs = records.len();
    let errors = records.iter().filter(|r| r.error.is_some()).count();
    let wins = records.iter().filter(|r| r.won).count();
    writeln!(writer, "Plans: {}", summaries.len())?;
    writeln!(writer, "Sessions: {total_runs}")?;
    writeln!(writer, "Wins: {}", wins.to_string().green())?;
    writeln!(writer, "Errors: {}", errors.to_string().red())?;
    writeln!(writer, "Total time: {total_duration:?}")?;
    writeln!(writer)?;

    for summary in summaries {
        let status = if summary.passed() {
            "✅ PASS".green()
        } else {
            "❌ FAIL".red()
        };
        writeln!(writer, "{} {}", status, summary.plan.bold())?;
        writeln!(
            writer,
            "   Wins: {}/{} ({:.1}%)",
            summary.wins,
            summary.runs - summary.errors,
            summary.win_rate * 100.0
        )?;
        writeln!(
            writer,
            "   Score: mean {:.1}, min {}, max {}",
            summary.mean_score, summary.min_score, summary.max_score
        )?;
        writeln!(
            writer,
            "   Detections: {:.2} per session, events: {:.2} per session",
            summary.mean_detections, summary.mean_events
        )?;
        if summary.stalled > 0 {
            writeln!(
                writer,
                "   {} sessions stalled and were expired",
                summary.stalled.to_string().yellow()
            )?;
        }
        writeln!(writer, "   Average time: {:?}", summary.average_duration)?;

        let failures: Vec<&RunRecord> = records
            .iter()
            .filter(|r| r.error.is_some() && summary_matches(summary, r))
            .collect();
        if !failures.is_empty() {
            writeln!(writer, "   Failures:")?;
            for failure in failures {
                writeln!(
                    writer,
                    "     • seed {}: {}",
                    failure.seed,
                    failure.error.as_deref().unwrap_or_default().red()
                )?;
            }
        }
        writeln!(writer)?;
    }

    let ranked = summaries.iter().filter(|s| s.runs > s.errors);
    let best = ranked
        .clone()
        .max_by(|a, b| a.mean_score.total_cmp(&b.mean_score));
    let worst = ranked.min_by(|a, b| a.mean_score.total_cmp(&b.mean_score));
    if let (Some(best), Some(worst)) = (best, worst) {
        writeln!(writer, "{}", "🏆 Strategy Comparison".bright_yellow().bold())?;
        writeln!(writer, "{}", "=====================".yellow())?;
        writeln!(
            writer,
            "Highest mean score: {} ({:.1})",
            best.plan.green(),
            best.mean_score
        )?;
        writeln!(
            writer,
            "Lowest mean score: {} ({:.1})",
            worst.plan.yellow(),
            worst.mean_score
        )?;
    }
    Ok(())
}

fn summary_matches(summary: &PlanSummary, record: &RunRecord) -> bool {
    summary.mode == record.mode && summary.strategy == record.strategy
}

pub fn generate_json_report<W: Write + ?Sized>(
    writer: &mut W,
    summaries: &[PlanSummary],
    records: &[RunRecord],
) -> Result<()> {
    let report = serde_json::json!({
        "summaries": summaries,
        "runs": records,
    });
    serde_json::to_writer_pretty(&mut *writer, &report)?;
    writeln!(writer)?;
    Ok(())
}

pub fn generate_markdown_report<W: Write + ?Sized>(
    writer: &mut W,
    summaries: &[PlanSummary],
) -> Result<()> {
    writeln!(writer, "# SimAdversary Simulation Results\n")?;

    let total_runs: usize = summaries.iter().map(|s| s.runs).sum();
    let errors: usize = summaries.iter().map(|s| s.errors).sum();
    writeln!(writer, "## Summary\n")?;
    writeln!(writer, "- **Plans**: {}", summaries.len())?;
    writeln!(writer, "- **Sessions**: {total_runs}")?;
    writeln!(writer, "- **Errors**: {errors}\n")?;

    writeln!(writer, "## Plans\n")?;
    writeln!(
        writer,
        "| Plan | Runs | Win rate | Mean score | Min | Max | Detections | Events |"
    )?;
    writeln!(writer, "|---|---|---|---|---|---|---|---|")?;
    for summary in summaries {
        let status = if summary.passed() { "✅" } else { "❌" };
        writeln!(
            writer,
            "| {status} {} | {} | {:.1}% | {:.1} | {} | {} | {:.2} | {:.2} |",
            summary.plan,
            summary.runs,
            summary.win_rate * 100.0,
            summary.mean_score,
            summary.min_score,
            summary.max_score,
            summary.mean_detections,
            summary.mean_events
        )?;
    }
    Ok(())
}

pub fn generate_csv_report<W: Write + ?Sized>(
    writer: &mut W,
    records: &[RunRecord],
) -> Result<()> {
    writeln!(
        writer,
        "mode,strategy,skill,defence,seed,won,ending,score,operations,steps_taken,detections,events,stalled,duration_ms,error"
    )?;
    for record in records {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            record.mode,
            record.strategy,
            record.skill,
            record.defence,
            record.seed,
            record.won,
            record.ending,
            record.score,
            record.operations,
            record.steps_taken,
            record.detections,
            record.events,
            record.stalled,
            record.duration.as_millis(),
            csv_field(record.error.as_deref().unwrap_or_default())
        )?;
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simadversary_game::{DefenceMaturity, SkillLevel};

    fn record(seed: u64, won: bool, error: Option<&str>) -> RunRecord {
        RunRecord {
            mode: "phishing".to_string(),
            strategy: "Balanced".to_string(),
            skill: SkillLevel::OrganisedCrime,
            defence: DefenceMaturity::Medium,
            seed,
            won,
            ending: if won { "success" } else { "gave_up" }.to_string(),
            score: if won { 120 } else { 15 },
            operations: 9,
            steps_taken: 7,
            detections: 1,
            events: 2,
            stalled: false,
            duration: Duration::from_millis(3),
            error: error.map(str::to_string),
        }
    }

    fn summary(errors: usize) -> PlanSummary {
        PlanSummary {
            plan: "phishing / Balanced (organised_crime vs medium)".to_string(),
            mode: "phishing".to_string(),
            strategy: "Balanced".to_string(),
            runs: 2,
            errors,
            wins: 1,
            win_rate: 0.5,
            mean_score: 67.5,
            min_score: 15,
            max_score: 120,
            mean_detections: 1.0,
            mean_events: 2.0,
            stalled: 0,
            average_duration: Duration::from_millis(3),
        }
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buffer = Vec::new();
        f(&mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn console_report_lists_failures_under_their_plan() {
        colored::control::set_override(false);
        let records = vec![record(1, true, None), record(2, false, Some("boom"))];
        let text = render(|w| {
            generate_console_report(w, &[summary(1)], &records, Duration::from_secs(1))
        });
        assert!(text.contains("❌ FAIL phishing / Balanced"));
        assert!(text.contains("seed 2: boom"));
        assert!(text.contains("Highest mean score"));
    }

    #[test]
    fn json_report_has_summaries_and_runs() {
        let text = render(|w| generate_json_report(w, &[summary(0)], &[record(4, true, None)]));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["summaries"][0]["win_rate"], 0.5);
        assert_eq!(value["runs"][0]["seed"], 4);
        assert_eq!(value["runs"][0]["duration"], 3);
        assert_eq!(value["runs"][0]["skill"], "organised_crime");
    }

    #[test]
    fn markdown_report_renders_a_table_row_per_plan() {
        let text = render(|w| generate_markdown_report(w, &[summary(0), summary(1)]));
        assert!(text.starts_with("# SimAdversary Simulation Results"));
        assert_eq!(text.matches("| ✅ ").count(), 1);
        assert_eq!(text.matches("| ❌ ").count(), 1);
        assert!(text.contains("50.0%"));
    }

    #[test]
    fn csv_report_quotes_error_text() {
        let text = render(|w| {
            generate_csv_report(w, &[record(5, false, Some("step, \"x\" missing"))])
        });
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("mode,strategy,skill"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("phishing,Balanced,organised_crime,medium,5,false,gave_up,15"));
        assert!(row.ends_with("\"step, \"\"x\"\" missing\""));
    }
}
