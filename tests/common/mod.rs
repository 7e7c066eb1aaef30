//! Shared fixtures for integration tests.

use tempfile::TempDir;

use tagwise::config::Settings;
use tagwise::engine::ClassifierEngine;
use tagwise::items::SqliteItemStore;
use tagwise::model::{LabelSource, ModelKind};

pub struct TestEnv {
    pub engine: ClassifierEngine,
    /// Second connection to the same item database, for seeding.
    pub seeder: SqliteItemStore,
    pub settings: Settings,
    _dir: TempDir,
}

pub fn rating_env() -> TestEnv {
    env_for(ModelKind::Rating)
}

pub fn env_for(model: ModelKind) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let settings = Settings {
        data_dir: dir.path().to_path_buf(),
        workers: 2,
        batch_size: 50,
    };
    let seeder = SqliteItemStore::open(settings.items_path()).unwrap();
    let engine = ClassifierEngine::open(&settings, model).unwrap();
    TestEnv {
        engine,
        seeder,
        settings,
        _dir: dir,
    }
}

/// Seed the canonical 60-item corpus: 55 "general" items all tagged "x",
/// 5 "explicit" items never tagged "x". Labeled via the engine so the
/// counts flow through the real mutation path (as imports, which are
/// trusted but not corrections).
pub fn seed_sixty_item_corpus(env: &TestEnv) {
    for i in 0..55 {
        let filler = format!("scene_{}", i % 7);
        let id = env.seeder.add_item(&["x", filler.as_str()]).unwrap();
        env.engine
            .set_label(id, Some("general"), LabelSource::Import, None)
            .unwrap();
    }
    for i in 0..5 {
        let filler = format!("closeup_{i}");
        let id = env.seeder.add_item(&["y", filler.as_str()]).unwrap();
        env.engine
            .set_label(id, Some("explicit"), LabelSource::Import, None)
            .unwrap();
    }
}
