use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context as _;
use stampede_testserver::TestServer;

fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn document(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/scenarios")
        .join(name)
}

fn describe(out: &Output) -> String {
    format!(
        "exit code {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    )
}

async fn run_against(server: &TestServer, doc: &str, extra: &[&str]) -> anyhow::Result<Output> {
    let exe = env!("CARGO_BIN_EXE_stampede");
    let base_url = server.base_url().to_string();
    let path = document(doc);
    let extra: Vec<String> = extra.iter().map(|s| s.to_string()).collect();

    tokio::task::spawn_blocking(move || {
        Command::new(exe)
            .arg("run")
            .arg(&path)
            .args(&extra)
            .env("BASE_URL", &base_url)
            .output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run stampede binary")
}

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let out = Command::new(env!("CARGO_BIN_EXE_stampede"))
        .arg("run")
        .arg("./does-not-matter.yaml")
        .arg("--duration")
        .arg("10x")
        .output()
        .context("run stampede binary")?;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    Ok(())
}

#[test]
fn missing_document_exit_30() -> anyhow::Result<()> {
    let out = Command::new(env!("CARGO_BIN_EXE_stampede"))
        .arg("run")
        .arg("./no-such-document.yaml")
        .output()
        .context("run stampede binary")?;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    Ok(())
}

#[test]
fn unknown_scenario_exit_30() -> anyhow::Result<()> {
    let out = Command::new(env!("CARGO_BIN_EXE_stampede"))
        .arg("run")
        .arg(document("thresholds_fail.yaml"))
        .arg("--scenario")
        .arg("nope")
        .env("BASE_URL", "http://127.0.0.1:9")
        .output()
        .context("run stampede binary")?;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    anyhow::ensure!(String::from_utf8_lossy(&out.stderr).contains("unknown scenario"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unexpected_failures_exit_10() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let out = run_against(&server, "broken_upstream.yaml", &["--output", "json"]).await?;
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 10, "{}", describe(&out));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn thresholds_failed_exit_11() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let out = run_against(&server, "thresholds_fail.yaml", &[]).await?;
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 11, "{}", describe(&out));
    anyhow::ensure!(String::from_utf8_lossy(&out.stderr).contains("thresholds failed"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn setup_failure_exit_20() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let out = run_against(&server, "setup_fail.yaml", &[]).await?;
    let requests = server.stats().requests_total();
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 20, "{}", describe(&out));
    // Only the failed setup request reached the target.
    anyhow::ensure!(requests == 1, "requests_total={requests}");
    Ok(())
}
