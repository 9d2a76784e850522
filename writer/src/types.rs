use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    /// Actual outcome did not match the expected outcome.
    Failed,
    /// An error kept the test from running to completion.
    Broken,
    /// The test did not run, e.g. because of unmet dependencies.
    Skipped,
    #[default]
    Passed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestSeverity {
    Blocker,
    Critical,
    Major,
    #[default]
    Normal,
    Minor,
    Trivial,
}

impl TestSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocker => "BLOCKER",
            Self::Critical => "CRITICAL",
            Self::Major => "MAJOR",
            Self::Normal => "NORMAL",
            Self::Minor => "MINOR",
            Self::Trivial => "TRIVIAL",
        }
    }
}

impl fmt::Display for TestSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the upper-case variant name. Matching is case sensitive.
impl FromStr for TestSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BLOCKER" => Ok(Self::Blocker),
            "CRITICAL" => Ok(Self::Critical),
            "MAJOR" => Ok(Self::Major),
            "NORMAL" => Ok(Self::Normal),
            "MINOR" => Ok(Self::Minor),
            "TRIVIAL" => Ok(Self::Trivial),
            other => Err(format!("unknown test severity: {}", other)),
        }
    }
}

/// Well-known values for [`TestResult::types`].
pub mod test_type {
    pub const SELENIUM: &str = "SELENIUM";
    pub const SMARTMETER: &str = "SMARTMETER";
    pub const JMETER: &str = "JMETER";
    pub const GEB: &str = "GEB";
    pub const SOAPUI: &str = "SOAPUI";
    pub const TESTNG: &str = "TESTNG";
    pub const JUNIT: &str = "JUNIT";
    pub const SPOCK: &str = "SPOCK";
    pub const SEB: &str = "SEB";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResultLink {
    pub name: Option<String>,
    #[serde(default)]
    pub url: String,
}

impl ResultLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: None,
            url: url.into(),
        }
    }

    pub fn named(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            url: url.into(),
        }
    }

    /// Parses `name|url`, splitting on the first literal `|` only.
    /// An entry without a separator is a bare url.
    pub fn parse(entry: &str) -> Self {
        match entry.split_once('|') {
            Some((name, url)) => Self::named(name, url),
            None => Self::new(entry),
        }
    }
}

/// Metadata of an attachment that a backend has persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ResultAttachment {
    id: Option<String>,
    name: Option<String>,
    path: Option<String>,
    content_type: Option<String>,
    size: u64,
}

impl ResultAttachment {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// One test execution as reported to storage.
///
/// `id` and `attachments` are owned by the storage layer: they are filled in
/// when a backend persists the result and cannot be set by callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct TestResult {
    id: Option<String>,
    pub project_id: Option<String>,
    pub suite: Option<String>,
    pub suite_id: Option<String>,
    pub job: Option<String>,
    pub job_id: Option<String>,
    pub milestone: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub environment: Option<String>,
    pub author: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Duration in milliseconds.
    pub length: Option<i64>,
    pub status: Option<TestStatus>,
    pub severity: Option<TestSeverity>,
    pub automated: bool,
    pub labels: Vec<String>,
    pub notes: Vec<String>,
    pub errors: Vec<String>,
    pub categories: Vec<String>,
    pub types: Vec<String>,
    attachments: Vec<ResultAttachment>,
    pub links: Vec<ResultLink>,
}

impl TestResult {
    pub fn new(name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            name: Some(name.into()),
            started_at: Some(started_at),
            ..Default::default()
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn attachments(&self) -> &[ResultAttachment] {
        &self.attachments
    }

    pub(crate) fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub(crate) fn push_attachment(&mut self, attachment: ResultAttachment) {
        self.attachments.push(attachment);
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_suite(mut self, suite: impl Into<String>, suite_id: impl Into<String>) -> Self {
        self.suite = Some(suite.into());
        self.suite_id = Some(suite_id.into());
        self
    }

    pub fn with_job(mut self, job: impl Into<String>, job_id: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_milestone(mut self, milestone: impl Into<String>) -> Self {
        self.milestone = Some(milestone.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_ended_at(mut self, ended_at: DateTime<Utc>) -> Self {
        self.ended_at = Some(ended_at);
        self
    }

    pub fn with_status(mut self, status: TestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_severity(mut self, severity: TestSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_automated(mut self, automated: bool) -> Self {
        self.automated = automated;
        self
    }

    pub fn add_label(&mut self, label: impl Into<String>) -> &mut Self {
        self.labels.push(label.into());
        self
    }

    pub fn add_note(&mut self, note: impl Into<String>) -> &mut Self {
        self.notes.push(note.into());
        self
    }

    pub fn add_error(&mut self, error: impl Into<String>) -> &mut Self {
        self.errors.push(error.into());
        self
    }

    /// Records an error together with its `source()` chain, one cause per line.
    pub fn add_error_from(&mut self, error: &(dyn std::error::Error + 'static)) -> &mut Self {
        let mut text = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            text.push_str("\nCaused by: ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        self.errors.push(text);
        self
    }

    pub fn add_category(&mut self, category: impl Into<String>) -> &mut Self {
        self.categories.push(category.into());
        self
    }

    pub fn add_type(&mut self, test_type: impl Into<String>) -> &mut Self {
        self.types.push(test_type.into());
        self
    }

    pub fn add_link(&mut self, link: ResultLink) -> &mut Self {
        self.links.push(link);
        self
    }
}
