//! Command handlers.

use std::io::Write;

use serde::Serialize;

use crate::cli::{Cli, Commands, ConfigAction};
use crate::config::{ClassifierConfig, Settings};
use crate::engine::ClassifierEngine;
use crate::error::{Result, TagwiseError};
use crate::infer::BatchOptions;

pub fn run(cli: &Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let mut engine = ClassifierEngine::open(&settings, cli.model)?;

    match &cli.command {
        Commands::Train => {
            let report = engine.train()?;
            if cli.machine {
                print_json(&report)?;
            } else {
                println!(
                    "trained {} model: {} samples, {} tags, {} pairs ({} tag weights, {} pair weights) in {:.2}s",
                    cli.model,
                    report.training_samples,
                    report.unique_tags,
                    report.unique_pairs,
                    report.tag_weights_count,
                    report.pair_weights_count,
                    report.duration_seconds
                );
            }
        }

        Commands::Infer { item_id } => {
            let prediction = engine.infer_one(*item_id)?;
            if cli.machine {
                print_json(&prediction)?;
            } else {
                match &prediction.label {
                    Some(label) => println!(
                        "item {item_id}: {label} (confidence {:.3})",
                        prediction.confidence
                    ),
                    None => println!(
                        "item {item_id}: no label (best confidence {:.3})",
                        prediction.confidence
                    ),
                }
            }
        }

        Commands::InferAll { limit, workers } => {
            engine.set_batch_options(BatchOptions {
                batch_size: settings.batch_size.max(1),
                workers: workers.unwrap_or_else(|| settings.effective_workers()),
                limit: *limit,
            });

            let quiet = cli.quiet || cli.machine;
            let progress = move |processed: u64, total: u64| {
                if !quiet {
                    eprint!("\rclassifying {processed}/{total}");
                    let _ = std::io::stderr().flush();
                }
            };
            let report = engine.infer_all(Some(&progress))?;
            if !quiet {
                eprintln!();
            }

            if cli.machine {
                print_json(&report)?;
            } else {
                println!(
                    "processed {} items: {} labeled, {} below threshold, {} failed in {:.2}s",
                    report.processed,
                    report.labeled,
                    report.skipped_low_confidence,
                    report.failed,
                    report.duration_seconds
                );
                let mut by_label: Vec<_> = report.by_label.iter().collect();
                by_label.sort();
                for (label, count) in by_label {
                    println!("  {label}: {count}");
                }
            }
        }

        Commands::Stats => {
            let stats = engine.get_stats()?;
            if cli.machine {
                print_json(&stats)?;
            } else {
                println!("model: {}", stats.model);
                println!("trained: {}", stats.trained);
                if let Some(at) = stats.metadata.get("last_trained_at") {
                    println!("last trained: {at}");
                }
                println!("unlabeled items: {}", stats.unlabeled_count);
                println!(
                    "pending corrections: {} (stale: {})",
                    stats.pending_corrections, stats.stale
                );
                let mut dist: Vec<_> = stats.label_distribution.iter().collect();
                dist.sort();
                for (label, count) in dist {
                    println!("  {label}: {count}");
                }
            }
        }

        Commands::Label {
            item_id,
            label,
            source,
            confidence,
        } => {
            let change = engine.set_label(*item_id, label.as_deref(), *source, *confidence)?;
            if cli.machine {
                print_json(&change)?;
            } else {
                println!(
                    "item {item_id}: {} -> {}",
                    change.old_label.as_deref().unwrap_or("(none)"),
                    change.new_label.as_deref().unwrap_or("(none)")
                );
            }
        }

        Commands::Config { action } => run_config(cli, &engine, action)?,

        Commands::Recover { yes } => {
            if !yes && !confirm("Clear all machine labels, retrain, and re-infer?")? {
                println!("aborted");
                return Ok(());
            }
            let report = engine.recover(None)?;
            if cli.machine {
                print_json(&report)?;
            } else {
                println!(
                    "recovery complete: cleared {}, retrained on {} samples, relabeled {}",
                    report.cleared_machine_labels,
                    report.train.training_samples,
                    report.infer.labeled
                );
            }
        }
    }

    Ok(())
}

fn run_config(cli: &Cli, engine: &ClassifierEngine, action: &ConfigAction) -> Result<()> {
    let store = engine.store();
    match action {
        ConfigAction::Get { key } => {
            if !crate::config::is_known_key(key) {
                return Err(TagwiseError::UnknownConfigKey(key.clone()));
            }
            let cfg = ClassifierConfig::load(store)?;
            let value = store
                .config_get(key)?
                .or_else(|| crate::config::default_for(key))
                .unwrap_or_else(|| {
                    // threshold_<label> keys fall back to the model default.
                    key.strip_prefix("threshold_")
                        .map(|label| cfg.label_threshold(label))
                        .unwrap_or(0.0)
                });
            if cli.machine {
                print_json(&serde_json::json!({ "key": key, "value": value }))?;
            } else {
                println!("{key} = {value}");
            }
        }
        ConfigAction::Set { key, value } => {
            store.config_set(key, *value)?;
            if cli.machine {
                print_json(&serde_json::json!({ "key": key, "value": value }))?;
            } else {
                println!("{key} = {value}");
            }
        }
        ConfigAction::List => {
            let cfg = ClassifierConfig::load(store)?;
            let effective = cfg.effective();
            if cli.machine {
                print_json(&effective)?;
            } else {
                let mut entries: Vec<_> = effective.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                for (key, value) in entries {
                    println!("{key} = {value}");
                }
            }
        }
        ConfigAction::Reset => {
            store.config_reset()?;
            if !cli.machine {
                println!("config reset to defaults");
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
