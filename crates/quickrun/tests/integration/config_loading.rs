use std::time::Duration;

use quickrun::config::{Config, ConfigError};

use super::fixture_path;

#[test]
fn test_load_valid_config() {
    let config =
        Config::from_file(fixture_path("configs", "valid_full.toml")).expect("Failed to load config");

    assert_eq!(config.module_name, "fixture-module");
    assert_eq!(config.timeout, Duration::from_secs(20));
    assert_eq!(config.cache_size, 8);
    assert_eq!(config.max_concurrent_jobs, 2);
    assert!(config.verbose);
    assert_eq!(config.build_tags, vec!["fixture"]);
    assert_eq!(
        config.environment.get("CGO_ENABLED").map(String::as_str),
        Some("0")
    );
    assert!(config.toolchain.denied_imports.contains(&"os/exec".to_string()));
    assert!(
        config
            .subprocess_env()
            .contains(&("GOFLAGS".to_string(), "-tags=fixture".to_string()))
    );
}

#[test]
fn test_load_minimal_config() {
    let config = Config::from_file(fixture_path("configs", "valid_minimal.toml"))
        .expect("Failed to load config");

    assert_eq!(config.timeout, Duration::from_secs(10));
    assert_eq!(config.toolchain.run_command, vec!["go", "run", "{entry}"]);

    // Everything the file leaves out keeps its default
    let compiler = quickrun::Compiler::new(Some(config));
    let config = compiler.config();
    assert_eq!(config.max_memory, 512 * 1024 * 1024);
    assert_eq!(config.cache_size, 100);
    assert_eq!(config.cache_ttl, Duration::from_secs(600));
    assert!(config.enable_cache);
    assert!(config.cleanup_on_exit);
}

#[test]
fn test_load_two_step_config() {
    let config = Config::from_file(fixture_path("configs", "two_step.toml"))
        .expect("Failed to load config");

    assert!(config.toolchain.has_build_step());
    assert_eq!(config.toolchain.run_command, vec!["./{binary}"]);
    // Unset toolchain fields keep the Go defaults
    assert_eq!(config.toolchain.init_command, vec!["go", "mod", "init", "{module}"]);
}

#[test]
fn test_load_invalid_empty_run_command() {
    let result = Config::from_file(fixture_path("configs", "invalid_empty_run_command.toml"));
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_entry_path() {
    let result = Config::from_file(fixture_path("configs", "invalid_entry_path.toml"));
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_syntax() {
    let result = Config::from_file(fixture_path("configs", "invalid_syntax.toml"));
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}
