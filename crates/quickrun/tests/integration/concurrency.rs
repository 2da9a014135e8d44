use std::sync::Arc;

use futures::future::join_all;
use quickrun::Compiler;

use super::test_config;

fn numbered_source(n: usize) -> String {
    format!("package main\n\nimport \"fmt\"\n\nfunc main() {{\n\tfmt.Print({n})\n}}\n")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_compilations() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.max_concurrent_jobs = 2;
    let compiler = Arc::new(Compiler::new(Some(config)));

    let tasks = (0..4).map(|n| {
        let compiler = Arc::clone(&compiler);
        tokio::spawn(async move { (n, compiler.compile_code(&numbered_source(n)).await) })
    });

    for joined in join_all(tasks).await {
        let (n, result) = joined.expect("task panicked");
        assert!(result.success, "{result}");
        assert_eq!(result.content_str(), n.to_string());
    }

    let snapshot = compiler.metrics().snapshot();
    assert_eq!(snapshot.total_compilations, 4);
    assert_eq!(snapshot.successful_compilations, 4);
    assert!(compiler.workspaces().is_empty());
}

#[tokio::test]
async fn test_close_cleans_up_and_rejects() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.debug = true;
    config.cleanup_on_exit = true;
    let compiler = Compiler::new(Some(config));

    let result = compiler.compile_code(&numbered_source(7)).await;
    assert!(result.success, "{result}");
    assert_eq!(compiler.workspaces().len(), 1);

    compiler.close().unwrap();
    compiler.close().unwrap();
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

    let result = compiler.compile_code(&numbered_source(7)).await;
    assert!(!result.success);
    assert_eq!(result.runtime_error, quickrun::CLOSED_MESSAGE);
}
