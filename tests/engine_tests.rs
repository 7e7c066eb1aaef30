//! End-to-end classifier scenarios.

mod common;

use std::time::Duration;

use common::{rating_env, seed_sixty_item_corpus};
use tagwise::TagwiseError;
use tagwise::engine::{spawn_infer_all, spawn_train};
use tagwise::items::ItemStore;
use tagwise::jobs::{JobState, JobStatus, JobTracker};
use tagwise::model::{LabelSource, ModelKind};

fn wait_terminal(tracker: &JobTracker, id: &str) -> JobStatus {
    for _ in 0..500 {
        if let Some(status) = tracker.get(id) {
            if status.state.is_terminal() {
                return status;
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("job never reached a terminal state");
}

#[test]
fn strongly_correlated_tag_trains_and_predicts() {
    let mut env = rating_env();
    seed_sixty_item_corpus(&env);
    env.engine.store().config_set("min_training_samples", 10.0).unwrap();

    let report = env.engine.train().unwrap();
    assert_eq!(report.training_samples, 60);
    assert!(report.tag_weights_count > 0);

    // weight(x, general): strongly positive, large, and finite.
    let snapshot = env.engine.store().load_snapshot().unwrap();
    let x = snapshot.tag_ids["x"];
    let general = snapshot
        .labels
        .iter()
        .find(|(_, name)| name.as_str() == "general")
        .map(|(id, _)| *id)
        .unwrap();
    let weight = snapshot.tag_weights[&(x, general)];
    assert!(weight.is_finite());
    assert!(weight > 5.0, "weight was {weight}");

    // A fresh item tagged "x" classifies as general with high confidence.
    let id = env.seeder.add_item(&["x"]).unwrap();
    let prediction = env.engine.infer_one(id).unwrap();
    assert_eq!(prediction.label.as_deref(), Some("general"));
    assert!(prediction.confidence > 0.9, "confidence was {}", prediction.confidence);
}

#[test]
fn too_few_samples_fails_without_writing_weights() {
    let mut env = rating_env();
    for _ in 0..5 {
        let id = env.seeder.add_item(&["x"]).unwrap();
        env.engine
            .set_label(id, Some("general"), LabelSource::Import, None)
            .unwrap();
    }

    // Default min_training_samples is 50.
    let err = env.engine.train().unwrap_err();
    match err {
        TagwiseError::InsufficientData { have, need } => {
            assert_eq!(have, 5);
            assert_eq!(need, 50);
        }
        other => panic!("expected InsufficientData, got {other}"),
    }

    assert_eq!(env.engine.store().tag_weight_count().unwrap(), 0);
    assert_eq!(env.engine.store().pair_weight_count().unwrap(), 0);
}

#[test]
fn training_is_idempotent() {
    let mut env = rating_env();
    seed_sixty_item_corpus(&env);
    env.engine.store().config_set("min_training_samples", 10.0).unwrap();
    env.engine.store().config_set("min_tag_frequency", 2.0).unwrap();
    env.engine.store().config_set("min_pair_cooccurrence", 2.0).unwrap();

    env.engine.train().unwrap();
    let first = env.engine.store().load_snapshot().unwrap();

    env.engine.train().unwrap();
    let second = env.engine.store().load_snapshot().unwrap();

    assert_eq!(
        first.tag_weights.keys().collect::<std::collections::HashSet<_>>(),
        second.tag_weights.keys().collect::<std::collections::HashSet<_>>()
    );
    for (key, weight) in &first.tag_weights {
        assert!((weight - second.tag_weights[key]).abs() < 1e-12);
    }
    assert_eq!(
        first.pair_weights.keys().collect::<std::collections::HashSet<_>>(),
        second.pair_weights.keys().collect::<std::collections::HashSet<_>>()
    );
    for (key, weight) in &first.pair_weights {
        assert!((weight - second.pair_weights[key]).abs() < 1e-12);
    }
}

#[test]
fn pruning_threshold_excludes_weak_weights() {
    let mut env = rating_env();
    seed_sixty_item_corpus(&env);
    env.engine.store().config_set("min_training_samples", 10.0).unwrap();
    env.engine.store().config_set("pruning_threshold", 2.0).unwrap();

    env.engine.train().unwrap();
    let snapshot = env.engine.store().load_snapshot().unwrap();
    for weight in snapshot.tag_weights.values() {
        assert!(weight.abs() >= 2.0, "weight {weight} survived pruning");
    }
    for weight in snapshot.pair_weights.values() {
        assert!(weight.abs() >= 2.0, "pair weight {weight} survived pruning");
    }
}

#[test]
fn user_corrections_count_machine_labels_do_not() {
    let env = rating_env();
    let id = env.seeder.add_item(&["x"]).unwrap();

    env.engine
        .set_label(id, Some("general"), LabelSource::User, None)
        .unwrap();
    assert_eq!(env.engine.pending_corrections().unwrap(), 1);

    env.engine
        .set_label(id, Some("explicit"), LabelSource::AiInference, Some(0.8))
        .unwrap();
    assert_eq!(env.engine.pending_corrections().unwrap(), 1);
}

#[test]
fn corrections_reset_after_training_and_drive_staleness() {
    let mut env = rating_env();
    seed_sixty_item_corpus(&env);
    env.engine.store().config_set("min_training_samples", 10.0).unwrap();
    env.engine.store().config_set("staleness_threshold", 3.0).unwrap();

    // Imports are trusted but not corrections; counter starts clean.
    assert_eq!(env.engine.pending_corrections().unwrap(), 0);

    for id in 1..=3 {
        env.engine
            .set_label(id, Some("general"), LabelSource::User, None)
            .unwrap();
    }
    assert_eq!(env.engine.pending_corrections().unwrap(), 3);
    assert!(env.engine.is_stale().unwrap());

    env.engine.train().unwrap();
    assert_eq!(env.engine.pending_corrections().unwrap(), 0);
    assert!(!env.engine.is_stale().unwrap());
}

#[test]
fn batch_inference_processes_everyone_and_respects_thresholds() {
    let mut env = rating_env();
    seed_sixty_item_corpus(&env);
    env.engine.store().config_set("min_training_samples", 10.0).unwrap();
    env.engine.train().unwrap();

    // 20 confident items and 3 with unseen tags (uniform distribution,
    // below every threshold).
    let mut unknown_ids = Vec::new();
    for _ in 0..20 {
        env.seeder.add_item(&["x"]).unwrap();
    }
    for i in 0..3 {
        let tag = format!("never_seen_{i}");
        unknown_ids.push(env.seeder.add_item(&[tag.as_str()]).unwrap());
    }

    let report = env.engine.infer_all(None).unwrap();
    assert_eq!(report.processed, 23);
    assert_eq!(report.labeled, 20);
    assert_eq!(report.skipped_low_confidence, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.by_label.get("general"), Some(&20));

    for id in unknown_ids {
        assert!(
            env.seeder.current_label(ModelKind::Rating, id).unwrap().is_none(),
            "below-threshold item {id} must stay unlabeled"
        );
    }
}

#[test]
fn infer_before_training_reports_model_not_trained() {
    let env = rating_env();
    let id = env.seeder.add_item(&["x"]).unwrap();

    assert!(matches!(
        env.engine.infer_one(id).unwrap_err(),
        TagwiseError::ModelNotTrained
    ));
    assert!(matches!(
        env.engine.infer_all(None).unwrap_err(),
        TagwiseError::ModelNotTrained
    ));
}

#[test]
fn recovery_clears_machine_labels_then_retrains_and_relabels() {
    let mut env = rating_env();
    seed_sixty_item_corpus(&env);
    env.engine.store().config_set("min_training_samples", 10.0).unwrap();
    env.engine.train().unwrap();

    // Plant some machine labels, including a bogus one.
    let bogus = env.seeder.add_item(&["y"]).unwrap();
    env.engine
        .set_label(bogus, Some("general"), LabelSource::AiInference, Some(0.51))
        .unwrap();
    for _ in 0..4 {
        env.seeder.add_item(&["x"]).unwrap();
    }

    let report = env.engine.recover(None).unwrap();
    assert_eq!(report.cleared_machine_labels, 1);
    assert_eq!(report.train.training_samples, 60);
    // The bogus item rejoined the unlabeled pool and was re-scored along
    // with the four fresh ones.
    assert_eq!(report.infer.processed, 5);
}

#[test]
fn character_model_creates_labels_on_demand() {
    let mut env = common::env_for(ModelKind::Character);
    env.engine.store().config_set("min_training_samples", 5.0).unwrap();

    for i in 0..12 {
        let id = env.seeder.add_item(&["red_scarf", "tall"]).unwrap();
        let label = if i % 2 == 0 { "alice" } else { "bob" };
        env.engine
            .set_label(id, Some(label), LabelSource::Import, None)
            .unwrap();
    }

    env.engine.train().unwrap();
    let names = env.engine.store().label_names().unwrap();
    assert!(names.contains(&"alice".to_string()));
    assert!(names.contains(&"bob".to_string()));
}

#[test]
fn background_jobs_train_then_infer() {
    let env = rating_env();
    seed_sixty_item_corpus(&env);
    env.engine.store().config_set("min_training_samples", 10.0).unwrap();
    for _ in 0..8 {
        env.seeder.add_item(&["x"]).unwrap();
    }

    let tracker = JobTracker::new();
    let train_id = spawn_train(&tracker, env.settings.clone(), ModelKind::Rating);
    let trained = wait_terminal(&tracker, &train_id);
    assert_eq!(trained.state, JobState::Completed, "error: {:?}", trained.error);
    assert_eq!(trained.percent, 100.0);
    assert_eq!(trained.result.as_ref().unwrap()["training_samples"], 60);

    let infer_id = spawn_infer_all(&tracker, env.settings.clone(), ModelKind::Rating, None);
    let inferred = wait_terminal(&tracker, &infer_id);
    assert_eq!(inferred.state, JobState::Completed, "error: {:?}", inferred.error);
    assert_eq!(inferred.result.as_ref().unwrap()["processed"], 8);
    assert_eq!(env.seeder.count_unlabeled(ModelKind::Rating).unwrap(), 0);
}

#[test]
fn background_job_failure_is_recorded_not_raised() {
    let env = rating_env();
    // Untrained model, nothing labeled: training must fail inside the job.
    let tracker = JobTracker::new();
    let id = spawn_train(&tracker, env.settings.clone(), ModelKind::Rating);
    let status = wait_terminal(&tracker, &id);
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().contains("Insufficient training data"));
}

#[test]
fn stats_summarize_model_state() {
    let mut env = rating_env();
    seed_sixty_item_corpus(&env);
    env.engine.store().config_set("min_training_samples", 10.0).unwrap();

    let before = env.engine.get_stats().unwrap();
    assert!(!before.trained);
    assert_eq!(before.unlabeled_count, 0);
    assert_eq!(before.label_distribution.get("general"), Some(&55));

    env.engine.train().unwrap();
    env.seeder.add_item(&["x"]).unwrap();

    let after = env.engine.get_stats().unwrap();
    assert!(after.trained);
    assert_eq!(after.unlabeled_count, 1);
    assert_eq!(
        after.metadata.get("training_samples").map(String::as_str),
        Some("60")
    );
}
