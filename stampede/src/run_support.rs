use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;

/// Process env snapshot merged with `--env` overrides.
pub(crate) type EnvVars = BTreeMap<String, String>;

pub(crate) fn merged_env(overrides: &[String]) -> anyhow::Result<EnvVars> {
    let mut map: EnvVars = std::env::vars().collect();

    for raw in overrides {
        let (k, v) = parse_env_override(raw)?;
        map.insert(k, v);
    }

    Ok(map)
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}

/// Writes `contents` to `path`, creating missing parent directories.
pub(crate) async fn write_report(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create summary output dir: {}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write summary: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_win_over_process_env() {
        let env = match merged_env(&["PATH=/nowhere".to_string(), "EMPTY=".to_string()]) {
            Ok(v) => v,
            Err(err) => panic!("{err}"),
        };
        assert_eq!(env.get("PATH").map(String::as_str), Some("/nowhere"));
        assert_eq!(env.get("EMPTY").map(String::as_str), Some(""));
    }

    #[test]
    fn malformed_overrides_are_rejected() {
        assert!(merged_env(&["NOEQUALS".to_string()]).is_err());
        assert!(merged_env(&["=value".to_string()]).is_err());
    }

    #[tokio::test]
    async fn write_report_creates_parent_dirs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested/deeper/summary.json");
        write_report(&path, b"{}").await?;
        anyhow::ensure!(tokio::fs::read_to_string(&path).await? == "{}");
        Ok(())
    }
}
