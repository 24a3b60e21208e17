use schemadom::persist::PersistenceMode;
use schemadom::settings::{HistorySettings, Settings};

#[test]
fn defaults_apply_without_a_file() {
    let settings = Settings::load(None).expect("settings");
    assert_eq!(settings.history.merge_window_ms, HistorySettings::default().merge_window_ms);
    assert!(!settings.history.require_transactions);
    assert_eq!(settings.persistence_mode(), PersistenceMode::InMemory);
    assert_eq!(settings.log.filter, "info");
}

#[test]
fn a_file_overrides_defaults() {
    let path = std::env::temp_dir().join(format!("schemadom_settings_{}.toml", std::process::id()));
    std::fs::write(
        &path,
        r#"
[history]
merge_window_ms = 250
max_depth = 10

[persistence]
mode = "file"
path = "documents.db"
"#,
    )
    .expect("write settings");
    let settings = Settings::load(path.to_str()).expect("settings");
    let _ = std::fs::remove_file(&path);

    assert_eq!(settings.history.merge_window_ms, 250);
    assert_eq!(settings.history.max_depth, 10);
    assert!(!settings.history.require_transactions, "keys missing from the file keep their defaults");
    assert_eq!(settings.persistence_mode(), PersistenceMode::File("documents.db".to_string()));
}

#[test]
fn file_mode_without_a_path_stays_in_memory() {
    let path = std::env::temp_dir().join(format!("schemadom_pathless_{}.toml", std::process::id()));
    std::fs::write(&path, "[persistence]\nmode = \"file\"\n").expect("write settings");
    let settings = Settings::load(path.to_str()).expect("settings");
    let _ = std::fs::remove_file(&path);
    assert_eq!(settings.persistence_mode(), PersistenceMode::InMemory);
}
