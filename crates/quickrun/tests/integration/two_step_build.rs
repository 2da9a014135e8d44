use quickrun::{CompilationStatus, Compiler, Config};

use super::{fixture_path, fixture_source};

fn two_step_compiler(root: &std::path::Path) -> Compiler {
    let mut config = Config::from_file(fixture_path("configs", "two_step.toml"))
        .expect("Failed to load config");
    config.workspace_root = Some(root.to_path_buf());
    Compiler::new(Some(config))
}

#[tokio::test]
async fn test_two_step_hello() {
    let root = tempfile::tempdir().unwrap();
    let compiler = two_step_compiler(root.path());

    let result = compiler.compile_code(&fixture_source("hello.go")).await;

    assert!(result.success, "{result}");
    assert_eq!(result.content_str(), "hello");
    // The build ran as its own process, so the run step is short
    assert!(result.compile_time > result.execution_time);
}

#[tokio::test]
async fn test_two_step_syntax_error_is_compile_error() {
    let root = tempfile::tempdir().unwrap();
    let compiler = two_step_compiler(root.path());

    let result = compiler.compile_code(&fixture_source("syntax_error.go")).await;

    assert_eq!(result.status, CompilationStatus::CompileError);
    assert!(result.compilation_error.contains("build step failed with exit code"));
    assert!(result.compilation_error.contains("syntax error"));
    assert!(result.runtime_error.is_empty());
}

#[tokio::test]
async fn test_two_step_exit_code_is_exact() {
    let root = tempfile::tempdir().unwrap();
    let compiler = two_step_compiler(root.path());

    let result = compiler.compile_code(&fixture_source("exit_code.go")).await;

    assert_eq!(result.status, CompilationStatus::RuntimeError);
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.runtime_error, "exit status 3");
}
