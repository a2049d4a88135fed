//! Integration tests for the browser-driven side.
//!
//! These tests require Chrome to be installed and available.
//! Run with: cargo test --test integration -- --ignored

use jsrev_tools::browser::BrowserSession;
use jsrev_tools::collector::{CollectOptions, ScriptCollector};
use jsrev_tools::config::Settings;

fn settings(dir: &tempfile::TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.paths.cache_dir = dir.path().join("cache");
    settings.paths.screenshot_dir = dir.path().join("shots");
    settings.paths.debugger_session_dir = dir.path().join("sessions");
    settings
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_launch_and_navigate() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);
    let mut session = BrowserSession::launch(&settings.browser)
        .await
        .expect("failed to launch browser");

    let (url, _title) = session
        .navigate("data:text/html,<title>probe</title><h1>hi</h1>")
        .await
        .expect("navigation failed");
    assert!(url.starts_with("data:"));

    let heading: String = session
        .evaluate("document.querySelector('h1').textContent")
        .await
        .expect("evaluate failed");
    assert_eq!(heading, "hi");

    session.close().await.expect("close failed");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_collect_inline_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let mut collector = ScriptCollector::new(settings(&dir)).expect("collector");

    let page = "data:text/html,<script>var secret = 'abc'.split('').join('');</script><p>x</p>";
    let result = collector
        .collect(page, &CollectOptions::default())
        .await
        .expect("collect failed");

    assert!(
        result.files.iter().any(|f| f.source.contains("secret")),
        "inline script not captured: {result:?}"
    );
    // Bounds hold.
    assert!(result.files.len() <= 200);
    assert_eq!(
        result.total_size,
        result.files.iter().map(|f| f.size).sum::<usize>()
    );

    collector.close().await.expect("close failed");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_collect_twice_hits_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut collector = ScriptCollector::new(settings(&dir)).expect("collector");
    let page = "data:text/html,<script>var a = 1;</script>";

    let first = collector
        .collect(page, &CollectOptions::default())
        .await
        .expect("first collect");
    let second = collector
        .collect(page, &CollectOptions::default())
        .await
        .expect("second collect");

    assert_eq!(first.files.len(), second.files.len());
    collector.close().await.expect("close failed");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_close_clears_collected_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut collector = ScriptCollector::new(settings(&dir)).expect("collector");
    collector
        .collect(
            "data:text/html,<script>var z = 9;</script>",
            &CollectOptions::default(),
        )
        .await
        .expect("collect");
    assert!(!collector.collected_files_summary().is_empty());

    collector.close().await.expect("close failed");
    assert!(collector.collected_files_summary().is_empty());
    assert!(!collector.is_running());
}
