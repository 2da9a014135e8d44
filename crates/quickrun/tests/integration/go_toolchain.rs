use std::time::{Duration, Instant};

use quickrun::{CompilationStatus, Compiler};

use super::{fixture_source, test_config};

#[tokio::test]
async fn test_hello() {
    let root = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(Some(test_config(root.path())));

    let result = compiler.compile_code(&fixture_source("hello.go")).await;

    assert_eq!(result.status, CompilationStatus::Success, "{result}");
    assert!(result.success);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.content_str(), "hello");
    assert!(result.duration >= result.compile_time);
    assert_eq!(result.hash.len(), 32);
}

#[tokio::test]
async fn test_second_run_is_cache_hit() {
    let root = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(Some(test_config(root.path())));
    let source = fixture_source("hello.go");

    let first = compiler.compile_code(&source).await;
    let second = compiler.compile_code(&source).await;

    assert!(first.success, "{first}");
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(second.status, CompilationStatus::CacheHit);
    assert_eq!(first.hash, second.hash);
    assert_eq!(second.content_str(), "hello");
}

#[tokio::test]
async fn test_nonzero_exit_is_runtime_error() {
    let root = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(Some(test_config(root.path())));

    let result = compiler.compile_code(&fixture_source("exit_code.go")).await;

    assert_eq!(result.status, CompilationStatus::RuntimeError);
    assert!(!result.success);
    // `go run` reports the program's status through its own exit code
    assert_ne!(result.exit_code, 0);
    assert_eq!(result.content_str(), "partial output\n");
    assert!(String::from_utf8_lossy(&result.error_output).contains("something went wrong"));
    assert_eq!(compiler.cache().size(), 0);
}

#[tokio::test]
async fn test_syntax_error_fails() {
    let root = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(Some(test_config(root.path())));

    let result = compiler.compile_code(&fixture_source("syntax_error.go")).await;

    assert!(!result.success);
    // Single-step toolchain: the build happens inside the run step
    assert_eq!(result.status, CompilationStatus::RuntimeError);
    assert!(String::from_utf8_lossy(&result.error_output).contains("syntax error"));
}

#[tokio::test]
async fn test_unsafe_import_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(Some(test_config(root.path())));

    let result = compiler.compile_code(&fixture_source("unsafe_import.go")).await;

    assert_eq!(result.status, CompilationStatus::ValidationError);
    assert!(result.compilation_error.contains("unsafe"));
    // Nothing was created on disk
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.timeout = Duration::from_secs(5);
    let compiler = Compiler::new(Some(config));

    let started = Instant::now();
    let result = compiler.compile_code(&fixture_source("infinite_loop.go")).await;

    assert_eq!(result.status, CompilationStatus::Timeout);
    assert!(!result.success);
    assert!(started.elapsed() < Duration::from_secs(8));
}

#[tokio::test]
async fn test_build_tags_are_passed() {
    let root = tempfile::tempdir().unwrap();
    let source = fixture_source("tagged.go");

    let compiler = Compiler::new(Some(test_config(root.path())));
    let result = compiler.compile_code(&source).await;
    assert!(!result.success, "build without the tag should exclude the file");

    let mut config = test_config(root.path());
    config.build_tags = vec!["special".to_string()];
    let compiler = Compiler::new(Some(config));
    let result = compiler.compile_code(&source).await;
    assert!(result.success, "{result}");
    assert_eq!(result.content_str(), "tagged build");
}

#[tokio::test]
async fn test_environment_overlay() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config
        .environment
        .insert("QUICKRUN_GREETING".to_string(), "hi from config".to_string());
    let compiler = Compiler::new(Some(config));

    let result = compiler.compile_code(&fixture_source("env.go")).await;
    assert!(result.success, "{result}");
    assert_eq!(result.content_str(), "hi from config");
}

#[tokio::test]
async fn test_compile_file_records_path() {
    let root = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(Some(test_config(root.path())));
    let path = super::fixture_path("sources", "hello.go");

    let result = compiler.compile(&path).await;
    assert!(result.success, "{result}");
    assert_eq!(
        result.file_path.as_deref(),
        Some(std::path::Path::new(&path))
    );
}

#[tokio::test]
async fn test_workspaces_are_cleaned_up() {
    let root = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(Some(test_config(root.path())));

    compiler.compile_code(&fixture_source("hello.go")).await;
    compiler.compile_code(&fixture_source("exit_code.go")).await;

    assert!(compiler.workspaces().is_empty());
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_memory_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let compiler = Compiler::new(Some(test_config(root.path())));

    let result = compiler.compile_code(&fixture_source("hello.go")).await;
    assert!(result.success, "{result}");
    assert!(result.memory_used > 0);
}
