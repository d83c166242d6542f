use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;

mod config;
mod db;
mod engine;

use config::{Command, Config};
use db::models::BetCategory;
use db::Database;
use engine::Engine;

fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let engine = Engine::new(db, &config);

    match config.command.clone() {
        Some(Command::Retrain { category }) => {
            let category = match category {
                Some(name) => match BetCategory::parse(&name) {
                    Some(c) => Some(c),
                    None => bail!("unknown bet category: {name}"),
                },
                None => None,
            };
            let reports = engine.retrain(category)?;
            if reports.is_empty() {
                println!("No category has enough labeled samples to train yet.");
            }
            for report in reports {
                println!(
                    "{} ({} samples):",
                    report.category, report.sample_count
                );
                for (model, outcome) in &report.outcomes {
                    match outcome {
                        Ok(m) => println!(
                            "  {model:<20} accuracy {:.3}  precision {:.3}  recall {:.3}  f1 {:.3}",
                            m.accuracy, m.precision, m.recall, m.f1
                        ),
                        Err(e) => println!("  {model:<20} skipped: {e}"),
                    }
                }
            }
        }
        Some(Command::Dedupe) => {
            let removed = engine.dedupe()?;
            println!("Removed {removed} duplicate pending prediction(s).");
        }
        Some(Command::Status) | None => print_status(&engine)?,
    }

    Ok(())
}

fn print_status(engine: &Engine) -> Result<()> {
    let report = engine.status()?;

    for status in &report.categories {
        if status.labeled == 0 && status.pending == 0 {
            continue;
        }
        println!(
            "{}: {} labeled, {} pending",
            status.category, status.labeled, status.pending
        );
        for c in &status.calibrations {
            let win_rate = if c.predicted_count > 0 {
                c.actual_wins as f64 / c.predicted_count as f64 * 100.0
            } else {
                0.0
            };
            println!(
                "  band {:<7} {:>4} predictions, {:.0}% won, factor {:.3}",
                c.band, c.predicted_count, win_rate, c.calibration_factor
            );
        }
        for c in status.conditions.iter().take(3) {
            println!(
                "  condition {:<22} {}/{} won, adjustment {:+}",
                c.condition, c.wins, c.total, c.suggested_adjustment
            );
        }
        for m in &status.models {
            println!(
                "  model {:<20} accuracy {:.3}  f1 {:.3}  ({} samples, {})",
                m.model_name,
                m.accuracy,
                m.f1,
                m.sample_count,
                m.trained_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    if !report.best_patterns.is_empty() {
        println!("Best patterns:");
        for p in &report.best_patterns {
            println!("  {} ({}-{})", p.pattern, p.wins, p.losses);
        }
    }
    if !report.worst_patterns.is_empty() {
        println!("Worst patterns:");
        for p in &report.worst_patterns {
            println!("  {} ({}-{})", p.pattern, p.wins, p.losses);
        }
    }

    Ok(())
}
