//! Files written for each run
//!
//! Every run gets its own directory under `--out-dir` holding `summary.json`
//! (final statistics plus the configuration that produced them) and
//! `command.txt`. The `--report` file is written separately, wherever the
//! user pointed it.

use cipdip_core::Result;
use cipdip_replay::{render_markdown, render_text, ReplayConfig, RunStats};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Serialize)]
struct Summary<'a> {
    stats: &'a RunStats,
    config: &'a ReplayConfig,
    failure: Option<String>,
    exit_code: u8,
}

/// Run directory under an output root
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    dir: PathBuf,
}

impl RunArtifacts {
    /// Create `<root>/<timestamp>-<id>` for this run
    pub fn create(root: &Path, stats: &RunStats) -> Result<Self> {
        let id = stats.run_id.to_string();
        let dir = root.join(format!(
            "{}-{}",
            stats.started_at.format("%Y%m%d-%H%M%S"),
            &id[id.len() - 8..]
        ));
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_summary(
        &self,
        stats: &RunStats,
        config: &ReplayConfig,
        failure: Option<String>,
        exit_code: u8,
    ) -> Result<PathBuf> {
        let summary = Summary {
            stats,
            config,
            failure,
            exit_code,
        };
        let body = serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?;
        let path = self.dir.join("summary.json");
        fs::write(&path, body)?;
        debug!(path = %path.display(), "Summary written");
        Ok(path)
    }

    pub fn write_command(&self, argv: &[String]) -> Result<PathBuf> {
        let path = self.dir.join("command.txt");
        fs::write(&path, format!("{}\n", argv.join(" ")))?;
        Ok(path)
    }
}

/// Markdown for `.md` paths, plain text otherwise
pub fn report_body(path: &Path, stats: &RunStats) -> String {
    let markdown = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
    if markdown {
        render_markdown(stats)
    } else {
        render_text(stats)
    }
}

pub fn write_report(path: &Path, stats: &RunStats) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, report_body(path, stats))?;
    debug!(path = %path.display(), "Report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipdip_replay::ReportAggregator;

    fn stats() -> RunStats {
        ReportAggregator::new().summary()
    }

    #[test]
    fn test_summary_and_command() {
        let root = tempfile::tempdir().unwrap();
        let stats = stats();
        let config = ReplayConfig {
            input: Some(PathBuf::from("fo.pcap")),
            ..Default::default()
        };

        let artifacts = RunArtifacts::create(root.path(), &stats).unwrap();
        assert!(artifacts.dir().starts_with(root.path()));

        let summary = artifacts.write_summary(&stats, &config, Some("cancelled".into()), 130).unwrap();
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(summary).unwrap()).unwrap();
        assert_eq!(value["exit_code"], 130);
        assert_eq!(value["failure"], "cancelled");
        assert_eq!(value["stats"]["run_id"], stats.run_id.to_string());
        assert_eq!(value["config"]["input"], "fo.pcap");

        let command = artifacts
            .write_command(&["cipdip".to_string(), "--input".to_string(), "fo.pcap".to_string()])
            .unwrap();
        assert_eq!(fs::read_to_string(command).unwrap(), "cipdip --input fo.pcap\n");
    }

    #[test]
    fn test_report_format_follows_extension() {
        let stats = stats();
        assert!(report_body(Path::new("run.md"), &stats).starts_with("# "));
        assert!(!report_body(Path::new("run.txt"), &stats).starts_with("# "));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.MD");
        write_report(&path, &stats).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), render_markdown(&stats));
    }
}
