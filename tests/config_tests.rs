use manga_counts::config::{CliArgs, Config, MAX_SHARDS};
use manga_counts::CountsError;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_shard_override_zero() {
    let mut config = Config::default();
    config.counters.shards.insert("pages".to_string(), 0);

    let result = config.validate();
    assert!(result.is_err(), "Zero shards for a counter should fail validation");
}

#[test]
fn test_shard_override_above_max() {
    let mut config = Config::default();
    config
        .counters
        .shards
        .insert("pages".to_string(), MAX_SHARDS + 1);

    assert!(
        config.validate().is_err(),
        "More than {} shards should fail validation",
        MAX_SHARDS
    );
}

#[test]
fn test_shard_override_valid_values() {
    for shards in [1, 2, 16, 32, MAX_SHARDS] {
        let mut config = Config::default();
        config.counters.shards.insert("chapters".to_string(), shards);

        assert!(
            config.validate().is_ok(),
            "{} shards should be valid",
            shards
        );
    }
}

#[test]
fn test_empty_counter_name_rejected() {
    let mut config = Config::default();
    config.counters.shards.insert(String::new(), 4);

    match config.validate() {
        Err(CountsError::ValidationError(issues)) => {
            assert!(issues.iter().any(|i| i.field == "counters.shards"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_growth_window_bounds() {
    let mut config = Config::default();

    config.analytics.growth_window_days = 0;
    assert!(config.validate().is_err(), "A zero-day window should fail");

    config.analytics.growth_window_days = 3651;
    assert!(config.validate().is_err(), "A window over ten years should fail");

    config.analytics.growth_window_days = 7;
    assert!(config.validate().is_ok());
}

#[test]
fn test_cache_ttl_zero_is_valid() {
    let mut config = Config::default();
    config.analytics.cache_ttl_secs = 0;
    assert!(config.validate().is_ok(), "A TTL of 0 disables the cache");
}

// Every environment variable test lives in one function: the process
// environment is shared between test threads.
#[test]
fn test_env_overrides() {
    let invalid_values = [
        ("-1", "negative number"),
        ("abc", "letters"),
        ("4.5", "decimal"),
        ("", "empty string"),
        ("8 shards", "with unit suffix"),
    ];
    for (value, description) in invalid_values {
        std::env::set_var("MANGA_COUNTS_DEFAULT_SHARDS", value);
        let result = Config::default().merge_from_env();
        std::env::remove_var("MANGA_COUNTS_DEFAULT_SHARDS");

        assert!(
            result.is_err(),
            "Invalid shard count '{}' ({}) should fail to parse",
            value,
            description
        );
    }

    std::env::set_var("MANGA_COUNTS_GROWTH_WINDOW_DAYS", "-7");
    let result = Config::default().merge_from_env();
    std::env::remove_var("MANGA_COUNTS_GROWTH_WINDOW_DAYS");
    assert!(result.is_err(), "Negative growth window should fail to parse");

    std::env::set_var("MANGA_COUNTS_DEFAULT_SHARDS", "6");
    std::env::set_var("MANGA_COUNTS_GROWTH_WINDOW_DAYS", "14");
    std::env::set_var("MANGA_COUNTS_CACHE_TTL", "0");
    std::env::set_var("MANGA_COUNTS_LOG_LEVEL", "debug");
    std::env::set_var("MANGA_COUNTS_SNAPSHOT", "/tmp/manga-counts.json");
    let result = Config::default().merge_from_env();
    for var in [
        "MANGA_COUNTS_DEFAULT_SHARDS",
        "MANGA_COUNTS_GROWTH_WINDOW_DAYS",
        "MANGA_COUNTS_CACHE_TTL",
        "MANGA_COUNTS_LOG_LEVEL",
        "MANGA_COUNTS_SNAPSHOT",
    ] {
        std::env::remove_var(var);
    }

    let config = result.unwrap();
    assert_eq!(config.counters.default_shards, 6);
    assert_eq!(config.analytics.growth_window_days, 14);
    assert_eq!(config.analytics.cache_ttl_secs, 0);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(
        config.store.snapshot_path,
        Some(PathBuf::from("/tmp/manga-counts.json"))
    );

    std::env::set_var("MANGA_COUNTS_SNAPSHOT", "");
    let mut base = Config::default();
    base.store.snapshot_path = Some(PathBuf::from("/var/lib/store.json"));
    let result = base.merge_from_env();
    std::env::remove_var("MANGA_COUNTS_SNAPSHOT");
    assert_eq!(
        result.unwrap().store.snapshot_path,
        None,
        "An empty snapshot variable keeps the store in memory"
    );
}

#[test]
fn test_config_file_with_cli_overrides() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("manga-counts.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"[counters]
default_shards = 3

[counters.shards]
favorites = 12

[logging]
level = "warn""#
    )
    .unwrap();

    let cli = CliArgs {
        config_file: Some(path),
        snapshot: Some(temp_dir.path().join("store.json")),
        log_level: None,
    };
    // Not load_with_cli: the environment is shared with test_env_overrides.
    let config = Config::from_file(cli.config_file.as_ref().unwrap())
        .unwrap()
        .merge_from_cli(&cli);

    assert_eq!(config.counters.default_shards, 3);
    assert_eq!(config.counters.shards_for("favorites"), 12);
    assert_eq!(config.counters.shards_for("srs_0000000001"), 3);
    assert_eq!(config.logging.level, "warn");
    assert_eq!(
        config.store.snapshot_path,
        Some(temp_dir.path().join("store.json"))
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_config_file() {
    let cli = CliArgs {
        config_file: Some(PathBuf::from("/nonexistent/manga-counts.toml")),
        ..Default::default()
    };
    assert!(matches!(
        Config::load_with_cli(&cli),
        Err(CountsError::IoError(_))
    ));
}

#[test]
fn test_malformed_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        Config::from_file(&path),
        Err(CountsError::ParseError(_))
    ));
}
