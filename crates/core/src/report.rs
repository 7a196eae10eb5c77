//! The outcome of the scenarios of a suite.

use std::{
    fs::File,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{Context as _, Result};
use chain_it_config::Arguments;
use serde::{Deserialize, Serialize};
use temp_dir::TempDir;

use crate::scenarios::Scenario;

const GREEN: &str = "\x1B[32m";
const RED: &str = "\x1B[31m";
const BOLD: &str = "\x1B[1m";
const RESET: &str = "\x1B[0m";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub passed: bool,
    /// The output of the final query of a passing scenario.
    pub output: Option<String>,
    /// The error chain of a failing scenario.
    pub error: Option<String>,
    /// What the cli client printed last, for diagnosing failures.
    pub last_output: Option<String>,
    pub duration: Duration,
}

impl ScenarioReport {
    pub fn new(
        scenario: Scenario,
        result: Result<String>,
        last_output: Option<String>,
        duration: Duration,
    ) -> Self {
        let (output, error) = match result {
            Ok(output) => (Some(output), None),
            Err(error) => (None, Some(format!("{error:#}"))),
        };
        Self {
            scenario,
            passed: error.is_none(),
            output,
            error,
            last_output,
            duration,
        }
    }

    pub fn print(&self) {
        if self.passed {
            println!(
                "{GREEN}PASS{RESET} {} ({:.2?})",
                self.scenario, self.duration
            );
            if let Some(output) = self.output.as_deref() {
                println!("     {}", output.trim());
            }
        } else {
            println!("{RED}FAIL{RESET} {} ({:.2?})", self.scenario, self.duration);
            if let Some(error) = self.error.as_deref() {
                println!("     error: {error}");
            }
            if let Some(output) = self.last_output.as_deref() {
                println!("     last cli output: {}", output.trim());
            }
        }
    }
}

/// The outcome of a whole suite together with the configuration it ran with.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuiteReport {
    pub config: Arguments,
    pub scenarios: Vec<ScenarioReport>,
}

impl SuiteReport {
    pub fn new(config: Arguments) -> Self {
        Self {
            config,
            scenarios: Vec::new(),
        }
    }

    pub fn push(&mut self, report: ScenarioReport) {
        report.print();
        self.scenarios.push(report);
    }

    pub fn passed(&self) -> usize {
        self.scenarios.iter().filter(|report| report.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.scenarios.len() - self.passed()
    }

    pub fn print_summary(&self) {
        let colour = if self.failed() == 0 { GREEN } else { RED };
        println!(
            "\n{BOLD}{colour}{} passed, {} failed{RESET}",
            self.passed(),
            self.failed()
        );
    }

    /// Writes the report as JSON into `directory` and returns the path of the file.
    pub fn write_to_file(&self, directory: &Path) -> Result<PathBuf> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let path = directory.join(format!("report-{timestamp}.json"));

        let file = File::create(&path)
            .with_context(|| format!("Failed to create the report file {}", path.display()))?;
        serde_json::to_writer_pretty(file, self).context("Failed to write the report")?;

        Ok(path)
    }

    /// Writes the report into the working directory of the suite.
    ///
    /// A `temporary` working directory only outlives the run when a scenario failed, so that the
    /// report and the node logs can be inspected. When everything passed it is removed and no
    /// report is written.
    pub fn persist(
        &self,
        directory: &Path,
        temporary: Option<TempDir>,
    ) -> Result<Option<PathBuf>> {
        match temporary {
            Some(temporary) if self.failed() == 0 => {
                tracing::info!(
                    workdir = %temporary.path().display(),
                    "Discarding the temporary working directory, pass --workdir to keep the report"
                );
                Ok(None)
            }
            Some(temporary) => {
                let path = self.write_to_file(directory)?;
                temporary.leak();
                tracing::warn!(
                    workdir = %directory.display(),
                    "Kept the temporary working directory of the failed suite"
                );
                Ok(Some(path))
            }
            None => self.write_to_file(directory).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_keep_the_error_chain_and_last_output() {
        let error = anyhow::anyhow!("invalid nonce").context("Failed to submit the transfer");

        let report = ScenarioReport::new(
            Scenario::Transfer,
            Err(error),
            Some("Error: invalid nonce".into()),
            Duration::from_millis(3),
        );

        assert!(!report.passed);
        assert_eq!(
            report.error.as_deref(),
            Some("Failed to submit the transfer: invalid nonce")
        );
        assert_eq!(report.last_output.as_deref(), Some("Error: invalid nonce"));
    }

    #[test]
    fn suite_reports_are_written_as_json() {
        let directory = TempDir::new().unwrap();
        let mut suite = SuiteReport::new(Arguments::default());
        suite.push(ScenarioReport::new(
            Scenario::ContractExist,
            Ok("true".into()),
            Some("true".into()),
            Duration::from_millis(1),
        ));

        let path = suite.write_to_file(directory.path()).unwrap();

        let written: serde_json::Value =
            serde_json::from_reader(File::open(path).unwrap()).unwrap();
        assert_eq!(written["scenarios"][0]["scenario"], "contract-exist");
        assert_eq!(written["scenarios"][0]["passed"], true);
        assert_eq!(suite.failed(), 0);
    }

    fn failed_suite() -> SuiteReport {
        let mut suite = SuiteReport::new(Arguments::default());
        suite.push(ScenarioReport::new(
            Scenario::Transfer,
            Err(anyhow::anyhow!("invalid nonce")),
            None,
            Duration::from_millis(1),
        ));
        suite
    }

    #[test]
    fn temporary_directories_of_failed_suites_are_kept() {
        // Arrange
        let temporary = TempDir::new().unwrap();
        let directory = temporary.path().to_path_buf();

        // Act
        let path = failed_suite()
            .persist(&directory, Some(temporary))
            .unwrap()
            .unwrap();

        // Assert
        assert!(path.exists());
        std::fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn temporary_directories_of_passing_suites_are_discarded() {
        // Arrange
        let temporary = TempDir::new().unwrap();
        let directory = temporary.path().to_path_buf();
        let suite = SuiteReport::new(Arguments::default());

        // Act
        let path = suite.persist(&directory, Some(temporary)).unwrap();

        // Assert
        assert_eq!(path, None);
        assert!(!directory.exists());
    }

    #[test]
    fn explicit_working_directories_always_get_the_report() {
        // Arrange
        let directory = TempDir::new().unwrap();

        // Act
        let path = failed_suite().persist(directory.path(), None).unwrap();

        // Assert
        assert!(path.unwrap().starts_with(directory.path()));
    }
}
