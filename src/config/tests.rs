use super::*;

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert!(config.embedding.enabled);
    assert!(!config.generation.enabled);
    assert!(!config.managed_store.enabled);
    assert!(!config.live_search.enabled);
}

#[test]
fn parses_partial_toml() {
    let config: Config = toml::from_str(
        r#"
        [generation]
        enabled = true
        endpoint = "https://api.example.com"
        api_key = "sk-test"
        model = "test-model"

        [chunking]
        chunk_size = 400
        "#,
    )
    .expect("partial config parses");

    assert!(config.generation.enabled);
    assert_eq!(config.generation.api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.chunking.chunk_size, 400);
    // Unspecified sections keep defaults
    assert_eq!(config.chunking.overlap, 100);
    assert_eq!(config.embedding.model, "nomic-embed-text:latest");
    assert!(config.validate().is_ok());
}

#[test]
fn rejects_invalid_endpoint() {
    let mut config = Config::default();
    config.embedding.endpoint = "not a url".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
}

#[test]
fn rejects_zero_timeout() {
    let mut config = Config::default();
    config.generation.timeout_seconds = 0;
    assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout(0))));
}

#[test]
fn rejects_overlap_at_least_chunk_size() {
    let mut config = Config::default();
    config.chunking.chunk_size = 200;
    config.chunking.overlap = 200;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OverlapTooLarge(200, 200))
    ));
}

#[test]
fn rejects_tiny_content_limit() {
    let mut config = Config::default();
    config.limits.max_content_bytes = 100;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidContentLimit(100))
    ));
}

#[test]
fn rejects_empty_generation_model_when_enabled() {
    let mut config = Config::default();
    config.generation.model = String::new();
    // Disabled generation does not require a model
    assert!(config.validate().is_ok());
    config.generation.enabled = true;
    assert!(matches!(config.validate(), Err(ConfigError::InvalidModel(_))));
}

#[test]
fn save_and_load_roundtrip() {
    let temp_dir = tempfile::TempDir::new().expect("can create temp dir");
    let mut config = Config::default();
    config.base_dir = Some(temp_dir.path().to_path_buf());
    config.chunking.chunk_size = 512;

    config.save().expect("can save config");

    let written = std::fs::read_to_string(temp_dir.path().join(CONFIG_FILE_NAME))
        .expect("config file exists");
    let reloaded: Config = toml::from_str(&written).expect("saved config parses");
    assert_eq!(reloaded.chunking.chunk_size, 512);
}
