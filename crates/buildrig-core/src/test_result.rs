//! Outputs of one test target.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{display_path, Result, RigError};
use crate::proto::TestStatus;

/// Basename of the test log.
pub const TEST_LOG: &str = "test.log";

/// Basename of the ant-compatible XML test report. It holds stdout and
/// stderr separately, without the wrapping found in [`TEST_LOG`].
pub const TEST_XML: &str = "test.xml";

/// Basename of LCOV coverage data.
pub const COVERAGE_DAT: &str = "coverage.dat";

/// Basename of LCOV baseline coverage data.
pub const BASELINE_COVERAGE_DAT: &str = "baseline_coverage.dat";

/// The output files reported for one test label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResultView {
    label: String,
    files: Vec<PathBuf>,
    status: TestStatus,
    attempts: usize,
}

impl TestResultView {
    pub fn new(label: impl Into<String>, files: Vec<PathBuf>) -> Self {
        TestResultView {
            label: label.into(),
            files,
            status: TestStatus::NoStatus,
            attempts: 0,
        }
    }

    /// Append the outputs of another result event for this label.
    pub(crate) fn record_attempt(&mut self, status: TestStatus, files: Vec<PathBuf>) {
        self.files.extend(files);
        self.status = status;
        self.attempts += 1;
    }

    /// Label of the test target.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Every output file, in the order they were reported.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Status from the last reported result.
    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// Number of result events merged into this view.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// The single output file named `basename`.
    ///
    /// `Ok(None)` when no file matches; [`RigError::AmbiguousFile`] listing
    /// every match when more than one does.
    pub fn file(&self, basename: &str) -> Result<Option<&Path>> {
        let matches: Vec<&PathBuf> = self
            .files
            .iter()
            .filter(|p| p.file_name() == Some(OsStr::new(basename)))
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.as_path())),
            _ => Err(RigError::AmbiguousFile {
                basename: basename.to_string(),
                matches: matches
                    .iter()
                    .map(|p| PathBuf::from(display_path(p)))
                    .collect(),
            }),
        }
    }

    /// Text of the output file named `basename`, or empty if there is none.
    ///
    /// Coverage files in particular are legitimately absent from runs that
    /// did not collect coverage.
    pub fn content(&self, basename: &str) -> Result<String> {
        match self.file(basename)? {
            Some(path) => Ok(String::from_utf8_lossy(&fs::read(path)?).into_owned()),
            None => Ok(String::new()),
        }
    }

    /// Lines of the output file named `basename`, or empty if there is none.
    pub fn lines(&self, basename: &str) -> Result<Vec<String>> {
        Ok(self
            .content(basename)?
            .lines()
            .map(str::to_string)
            .collect())
    }
}
