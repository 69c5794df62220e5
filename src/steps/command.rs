//! Trigger and fetch executors backed by an external scraper program.
//!
//! The scraper owns the browser automation. Its contract:
//! - `<program> [args..] collect <brand> [--headless]` prints a result tag
//!   (`collected`, `analyzing`, `analyzed`, `no_brand_found`) on its last
//!   stdout line.
//! - `<program> [args..] download <brand> --output <file> --wait-secs <n> [--headless]`
//!   writes the raw report to `<file>`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{FetchExecutor, FetchOutcome, FetchRequest, TriggerExecutor, TriggerOutcome};
use crate::artifacts::{file_size, is_complete_report, raw_report_path};
use crate::config::ScraperConfig;

pub struct ScraperCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ScraperCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &ScraperConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Run one scraper invocation, returning trimmed stdout
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(program = %self.program, ?args, "Running scraper");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                anyhow!(
                    "{} {} timed out after {}s",
                    self.program,
                    args.first().unwrap_or(&""),
                    self.timeout.as_secs()
                )
            })?
            .with_context(|| format!("Failed to execute {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} {} failed ({}): {}",
                self.program,
                args.first().unwrap_or(&""),
                output.status,
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn download(
        &self,
        brand: &str,
        output: &Path,
        wait_secs: u64,
        headless: bool,
    ) -> Result<()> {
        let output = output.to_string_lossy().into_owned();
        let wait = wait_secs.to_string();
        let mut args = vec![
            "download",
            brand,
            "--output",
            output.as_str(),
            "--wait-secs",
            wait.as_str(),
        ];
        if headless {
            args.push("--headless");
        }
        self.run(&args).await.map(|_| ())
    }
}

#[async_trait]
impl TriggerExecutor for ScraperCommand {
    async fn trigger(&self, brand: &str, headless: bool) -> Result<TriggerOutcome> {
        let mut args = vec!["collect", brand];
        if headless {
            args.push("--headless");
        }
        let stdout = self.run(&args).await?;

        let outcome = match stdout.lines().rev().find(|line| !line.trim().is_empty()) {
            Some(tag) => TriggerOutcome::from_tag(tag),
            None => TriggerOutcome::Error("scraper printed no result".to_string()),
        };
        debug!(brand, ?outcome, "Collect finished");
        Ok(outcome)
    }
}

#[async_trait]
impl FetchExecutor for ScraperCommand {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchOutcome> {
        let thresholds = request.thresholds;
        let path = raw_report_path(request.output_folder, request.brand);

        if !request.force_regenerate && is_complete_report(&path, thresholds.min_report_bytes) {
            info!(brand = request.brand, path = %path.display(), "Reusing complete report");
            return Ok(FetchOutcome::Downloaded { cached: true });
        }
        if let Some(size) = file_size(&path) {
            debug!(
                brand = request.brand,
                size,
                "Existing report undersized or forced, fetching again"
            );
        }

        tokio::fs::create_dir_all(request.output_folder)
            .await
            .with_context(|| format!("Failed to create {}", request.output_folder.display()))?;

        self.download(request.brand, &path, thresholds.fetch_wait_secs, request.headless)
            .await?;
        if is_complete_report(&path, thresholds.min_report_bytes) {
            return Ok(FetchOutcome::Downloaded { cached: false });
        }

        warn!(
            brand = request.brand,
            size = file_size(&path).unwrap_or(0),
            wait_secs = thresholds.fetch_extended_wait_secs,
            "Report incomplete, retrying with extended wait"
        );
        self.download(
            request.brand,
            &path,
            thresholds.fetch_extended_wait_secs,
            request.headless,
        )
        .await?;

        if is_complete_report(&path, thresholds.min_report_bytes) {
            Ok(FetchOutcome::Downloaded { cached: false })
        } else {
            Ok(FetchOutcome::Incomplete {
                bytes: file_size(&path).unwrap_or(0),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::session::Thresholds;
    use std::fs;
    use tempfile::TempDir;

    /// Scraper stand-in run through `sh` so the script never needs exec permission
    fn scraper(temp_dir: &TempDir, body: &str) -> ScraperCommand {
        let script = temp_dir.path().join("scraper.sh");
        fs::write(&script, body).unwrap();
        ScraperCommand::new(
            "sh",
            vec![script.to_string_lossy().to_string()],
            Duration::from_secs(10),
        )
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            min_report_bytes: 100,
            min_summary_chars: 100,
            fetch_wait_secs: 10,
            fetch_extended_wait_secs: 15,
        }
    }

    #[tokio::test]
    async fn test_trigger_reads_last_line() {
        let temp_dir = TempDir::new().unwrap();
        let cmd = scraper(&temp_dir, "echo 'searching...'\necho analyzed\n");
        let outcome = cmd.trigger("Acme", true).await.unwrap();
        assert_eq!(outcome, TriggerOutcome::Analyzed);
    }

    #[tokio::test]
    async fn test_trigger_passes_headless_flag() {
        let temp_dir = TempDir::new().unwrap();
        let cmd = scraper(
            &temp_dir,
            "if [ \"$3\" = \"--headless\" ]; then echo collected; else echo analyzing; fi\n",
        );
        assert_eq!(
            cmd.trigger("Acme", true).await.unwrap(),
            TriggerOutcome::Collected
        );
        assert_eq!(
            cmd.trigger("Acme", false).await.unwrap(),
            TriggerOutcome::Analyzing
        );
    }

    #[tokio::test]
    async fn test_trigger_failure_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let cmd = scraper(&temp_dir, "echo 'login expired' >&2\nexit 3\n");
        let err = cmd.trigger("Acme", true).await.unwrap_err();
        assert!(err.to_string().contains("login expired"));
    }

    #[tokio::test]
    async fn test_fetch_reuses_complete_report() {
        let temp_dir = TempDir::new().unwrap();
        let cmd = scraper(&temp_dir, "exit 1\n");
        let out = temp_dir.path().join("html");
        fs::create_dir_all(&out).unwrap();
        fs::write(raw_report_path(&out, "Acme"), vec![b'x'; 200]).unwrap();

        let outcome = cmd
            .fetch(FetchRequest {
                brand: "Acme",
                headless: true,
                force_regenerate: false,
                output_folder: &out,
                thresholds: &thresholds(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Downloaded { cached: true });
    }

    #[tokio::test]
    async fn test_fetch_retries_once_with_extended_wait() {
        let temp_dir = TempDir::new().unwrap();
        // Full report only when given the extended wait
        let cmd = scraper(
            &temp_dir,
            "if [ \"$6\" = \"15\" ]; then printf '%300s' '' > \"$4\"; else printf 'tiny' > \"$4\"; fi\n",
        );
        let out = temp_dir.path().join("html");

        let outcome = cmd
            .fetch(FetchRequest {
                brand: "Acme Corp",
                headless: false,
                force_regenerate: false,
                output_folder: &out,
                thresholds: &thresholds(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Downloaded { cached: false });
        assert_eq!(file_size(&raw_report_path(&out, "Acme Corp")), Some(300));
    }

    #[tokio::test]
    async fn test_fetch_incomplete_after_retry() {
        let temp_dir = TempDir::new().unwrap();
        let cmd = scraper(&temp_dir, "printf 'tiny' > \"$4\"\n");
        let out = temp_dir.path().join("html");

        let outcome = cmd
            .fetch(FetchRequest {
                brand: "Acme",
                headless: false,
                force_regenerate: true,
                output_folder: &out,
                thresholds: &thresholds(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Incomplete { bytes: 4 });
    }
}
