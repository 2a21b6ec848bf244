use std::io::Write;

use octopoes_config::{
    ConfigLoadError, SettingsSource,
    loader::{load_base, load_from_file},
};

#[test]
fn toml_file_from_env_path_overrides_defaults() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    writeln!(
        file,
        r#"
log_filter = "octopoes=debug"

[xtdb]
url = "http://xtdb.internal:3000"
client = "acme"

[broker]
batch_size = 5

[bits]
disabled = ["dns-resolving"]
"#
    )
    .expect("write temp config");

    let path = file.path().to_path_buf();
    let path_str = path.display().to_string();
    let lookup = move |key: &str| {
        (key == "OCTOPOES_CONFIG_PATH").then(|| path_str.clone())
    };

    let (settings, source) = load_base(&lookup).expect("load settings");
    assert_eq!(source, SettingsSource::EnvPath(path));
    assert_eq!(settings.xtdb.client, "acme");
    assert_eq!(settings.xtdb.request_timeout_ms, 30_000);
    assert_eq!(settings.broker.batch_size, 5);
    assert_eq!(settings.broker.flush_interval_ms, 1_000);
    assert!(settings.bits.disabled.contains("dns-resolving"));
    settings.validate().expect("loaded settings are valid");
}

#[test]
fn json_file_is_parsed_by_extension() {
    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .expect("create temp config");
    write!(file, r#"{{"broker": {{"event_queue": "events"}}}}"#)
        .expect("write temp config");

    let settings = load_from_file(file.path()).expect("load json settings");
    assert_eq!(settings.broker.event_queue, "events");
}

#[test]
fn missing_file_reports_the_path() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let missing = dir.path().join("absent.toml");

    let err = load_from_file(&missing).expect_err("missing file must fail");
    match err {
        ConfigLoadError::Read { path, .. } => assert_eq!(path, missing),
        other => panic!("unexpected error: {other}"),
    }
}
