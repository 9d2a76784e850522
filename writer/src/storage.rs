use crate::attachment::Attachment;
use crate::config::{
    BackendKind, ConfigurationSource, Overrides, RestApiConfig, Resolver, Setting,
};
use crate::filesystem::FileSystemStorage;
use crate::rest::RestApiStorage;
use crate::types::{TestResult, TestSeverity, TestStatus};
use chrono::{SubsecRound, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Storage error: {message}")]
    Backend { message: String },

    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Failed to add result")]
    AddResult {
        #[source]
        source: Box<StorageError>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// The innermost error below any context or add-result wrappers.
    pub fn root(&self) -> &StorageError {
        match self {
            Self::Context { source, .. } | Self::AddResult { source } => source.root(),
            other => other,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), Self::Configuration { .. })
    }
}

pub(crate) trait WithContext<T> {
    fn context(self, message: impl Into<String>) -> StorageResult<T>;
}

impl<T, E: Into<StorageError>> WithContext<T> for Result<T, E> {
    fn context(self, message: impl Into<String>) -> StorageResult<T> {
        self.map_err(|e| StorageError::Context {
            message: message.into(),
            source: Box::new(e.into()),
        })
    }
}

/// A place results are persisted to.
///
/// `create_result` must assign the result's id as soon as anything has been
/// persisted, so a failing create can be compensated with `delete_result`.
pub trait StorageBackend: Send + Sync {
    fn create_result(
        &self,
        project_key: Option<&str>,
        result: &mut TestResult,
        attachments: &[Attachment],
    ) -> StorageResult<()>;

    fn delete_result(&self, result: &TestResult) -> StorageResult<()>;

    fn backend_name(&self) -> &'static str;

    /// Backends returning true accept every result without validating or
    /// storing it.
    fn discards_results(&self) -> bool {
        false
    }
}

/// Accepts and drops every result. Used when reporting is disabled.
#[derive(Debug, Default)]
pub struct DummyStorage;

impl StorageBackend for DummyStorage {
    fn create_result(
        &self,
        _project_key: Option<&str>,
        _result: &mut TestResult,
        _attachments: &[Attachment],
    ) -> StorageResult<()> {
        Ok(())
    }

    fn delete_result(&self, _result: &TestResult) -> StorageResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "dummy"
    }

    fn discards_results(&self) -> bool {
        true
    }
}

/// Entry point for reporting results: validates, enriches and hands results
/// to a [`StorageBackend`].
pub struct Storage {
    backend: Box<dyn StorageBackend>,
    overrides: Overrides,
}

impl Storage {
    pub fn new(backend: impl StorageBackend + 'static, overrides: Overrides) -> Self {
        Self {
            backend: Box::new(backend),
            overrides,
        }
    }

    pub fn from_configuration(
        configuration: &dyn ConfigurationSource,
        overrides: Overrides,
    ) -> StorageResult<Self> {
        Self::from_configurations(&[configuration], overrides)
    }

    /// Picks and builds the backend the configuration asks for. A disabled
    /// configuration always yields the dummy backend.
    pub fn from_configurations(
        sources: &[&dyn ConfigurationSource],
        overrides: Overrides,
    ) -> StorageResult<Self> {
        let resolver = Resolver::new(&overrides);

        let kind = if resolver.flag(Setting::Enabled, sources)? {
            resolver.backend(sources)?
        } else {
            info!("Result reporting is disabled, results will be discarded");
            BackendKind::Dummy
        };

        let backend: Box<dyn StorageBackend> = match kind {
            BackendKind::Dummy => Box::new(DummyStorage),
            BackendKind::Filesystem => {
                let base_dir = resolver
                    .path(Setting::BaseDir, sources)?
                    .ok_or_else(|| StorageError::configuration("Base directory is not set"))?;
                Box::new(FileSystemStorage::new(base_dir)?)
            }
            BackendKind::Restapi => {
                let config = RestApiConfig::new(
                    resolver.text(Setting::Endpoint, sources, None)?.unwrap_or_default(),
                    resolver.text(Setting::Username, sources, None)?.unwrap_or_default(),
                    resolver.text(Setting::Password, sources, None)?.unwrap_or_default(),
                );
                Box::new(RestApiStorage::new(config)?)
            }
        };

        debug!("Using {} result storage", backend.backend_name());

        Ok(Self { backend, overrides })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }

    pub fn add_result(&self, result: &mut TestResult) -> StorageResult<()> {
        self.add_result_for_project_with_attachments(None, result, &[])
    }

    pub fn add_result_with_attachments(
        &self,
        result: &mut TestResult,
        attachments: &[Attachment],
    ) -> StorageResult<()> {
        self.add_result_for_project_with_attachments(None, result, attachments)
    }

    pub fn add_result_for_project(
        &self,
        project_key: &str,
        result: &mut TestResult,
    ) -> StorageResult<()> {
        self.add_result_for_project_with_attachments(Some(project_key), result, &[])
    }

    pub fn add_configured_result(
        &self,
        configuration: &dyn ConfigurationSource,
        result: &mut TestResult,
    ) -> StorageResult<()> {
        self.add_result_with_configurations(&[configuration], result, &[])
    }

    pub fn add_configured_result_with_attachments(
        &self,
        configuration: &dyn ConfigurationSource,
        result: &mut TestResult,
        attachments: &[Attachment],
    ) -> StorageResult<()> {
        self.add_result_with_configurations(&[configuration], result, attachments)
    }

    /// Merges the configurations into `result` and stores it under the
    /// project key they resolve to.
    pub fn add_result_with_configurations(
        &self,
        configurations: &[&dyn ConfigurationSource],
        result: &mut TestResult,
        attachments: &[Attachment],
    ) -> StorageResult<()> {
        if !self.backend.discards_results() {
            ensure_not_stored(result).map_err(|e| StorageError::AddResult {
                source: Box::new(e),
            })?;
        }
        let project_key = Resolver::new(&self.overrides)
            .text(Setting::ProjectKey, configurations, None)
            .and_then(|key| {
                self.update_result_from_configurations(configurations, result)?;
                Ok(key)
            })
            .map_err(|e| StorageError::AddResult {
                source: Box::new(e),
            })?;
        self.add_result_for_project_with_attachments(project_key.as_deref(), result, attachments)
    }

    /// Stores `result`, assigning its id.
    ///
    /// Nothing is persisted when preparation or validation fails. When the
    /// backend fails after the result got an id, the partially stored result
    /// is deleted once; a failure of that cleanup is logged and the original
    /// error is returned.
    pub fn add_result_for_project_with_attachments(
        &self,
        project_key: Option<&str>,
        result: &mut TestResult,
        attachments: &[Attachment],
    ) -> StorageResult<()> {
        if self.backend.discards_results() {
            debug!("Discarding result {:?}", result.name);
            return Ok(());
        }

        let wrap = |e: StorageError| StorageError::AddResult {
            source: Box::new(e),
        };

        self.prepare_result(result).map_err(wrap)?;
        validate_result(result).map_err(wrap)?;
        let project_key = self.resolve_project_key(project_key, result).map_err(wrap)?;

        if let Err(e) = self
            .backend
            .create_result(project_key.as_deref(), result, attachments)
        {
            if let Some(id) = result.id() {
                info!("Deleting result {}", id);
                match self.backend.delete_result(result) {
                    Ok(()) => info!("Result deleted {}", id),
                    Err(cleanup) => error!(
                        "Failed to delete result {} after failing to add it: {}",
                        id, cleanup
                    ),
                }
            }
            return Err(wrap(e));
        }

        info!(
            "Result added {} {}",
            result.name.as_deref().unwrap_or_default(),
            result.id().unwrap_or_default()
        );
        Ok(())
    }

    fn prepare_result(&self, result: &mut TestResult) -> StorageResult<()> {
        if result.project_id.is_none() {
            result.project_id =
                Resolver::new(&self.overrides).text(Setting::ProjectId, &[], None)?;
        }
        if result.ended_at.is_none() {
            result.ended_at = Some(Utc::now().trunc_subsecs(3));
        }
        if result.status.is_none() {
            result.status = Some(TestStatus::Passed);
        }
        if result.severity.is_none() {
            result.severity = Some(TestSeverity::Normal);
        }
        Ok(())
    }

    fn resolve_project_key(
        &self,
        explicit: Option<&str>,
        result: &TestResult,
    ) -> StorageResult<Option<String>> {
        let mut project_key = explicit.map(str::to_string);
        if is_blank(result.project_id.as_deref()) {
            if is_blank(project_key.as_deref()) {
                project_key = self.overrides.raw(Setting::ProjectKey).map(str::to_string);
            }
            if is_blank(project_key.as_deref()) {
                return Err(StorageError::configuration(
                    "Both result project key and id are empty",
                ));
            }
        }
        Ok(project_key)
    }

    /// Fills scalar fields the result leaves unset from the configurations and
    /// puts configured labels, notes and links ahead of the result's own.
    pub fn update_result_from_configurations(
        &self,
        configurations: &[&dyn ConfigurationSource],
        result: &mut TestResult,
    ) -> StorageResult<()> {
        let resolver = Resolver::new(&self.overrides);

        result.suite = resolver.text(Setting::Suite, configurations, result.suite.take())?;
        result.suite_id = resolver.text(Setting::SuiteId, configurations, result.suite_id.take())?;
        result.job = resolver.text(Setting::Job, configurations, result.job.take())?;
        result.job_id = resolver.text(Setting::JobId, configurations, result.job_id.take())?;
        result.milestone =
            resolver.text(Setting::Milestone, configurations, result.milestone.take())?;
        result.name = resolver.text(Setting::Name, configurations, result.name.take())?;
        result.description =
            resolver.text(Setting::Description, configurations, result.description.take())?;
        result.environment =
            resolver.text(Setting::Environment, configurations, result.environment.take())?;
        result.author = resolver.text(Setting::Author, configurations, result.author.take())?;
        result.severity = resolver.severity(configurations, result.severity)?;

        let mut labels = resolver.texts(Setting::Labels, configurations)?;
        labels.append(&mut result.labels);
        result.labels = labels;

        let mut notes = resolver.texts(Setting::Notes, configurations)?;
        notes.append(&mut result.notes);
        result.notes = notes;

        let mut links = resolver.links(configurations)?;
        links.append(&mut result.links);
        result.links = links;

        Ok(())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

fn ensure_not_stored(result: &TestResult) -> StorageResult<()> {
    match result.id() {
        Some(id) => Err(StorageError::validation(format!(
            "Result id is already defined [{}]",
            id
        ))),
        None => Ok(()),
    }
}

/// Checks every rule a result must satisfy before it is stored.
pub fn validate_result(result: &TestResult) -> StorageResult<()> {
    ensure_not_stored(result)?;
    if result.name.is_none() {
        return Err(StorageError::validation("Result name is required"));
    }
    match (&result.suite, &result.suite_id) {
        (Some(suite), None) => {
            return Err(StorageError::validation(format!(
                "Both suite and suite id are required not only suite [{}]",
                suite
            )))
        }
        (None, Some(suite_id)) => {
            return Err(StorageError::validation(format!(
                "Both suite and suite id are required not only suite id [{}]",
                suite_id
            )))
        }
        _ => {}
    }
    match (&result.job, &result.job_id) {
        (Some(job), None) => {
            return Err(StorageError::validation(format!(
                "Both job and job id are required not only job [{}]",
                job
            )))
        }
        (None, Some(job_id)) => {
            return Err(StorageError::validation(format!(
                "Both job and job id are required not only job id [{}]",
                job_id
            )))
        }
        _ => {}
    }
    let Some(started_at) = result.started_at else {
        return Err(StorageError::validation("Result started at is required"));
    };
    let Some(ended_at) = result.ended_at else {
        return Err(StorageError::validation("Result ended at is required"));
    };
    if result.status.is_none() {
        return Err(StorageError::validation("Result status is required"));
    }
    if result.severity.is_none() {
        return Err(StorageError::validation("Result severity is required"));
    }
    if started_at > ended_at {
        return Err(StorageError::validation(format!(
            "Result ended before it started [{}, {}]",
            started_at, ended_at
        )));
    }
    for (index, link) in result.links.iter().enumerate() {
        if link.url.is_empty() {
            return Err(StorageError::validation(format!(
                "Result link {} url is required",
                index
            )));
        }
        if reqwest::Url::parse(&link.url).is_err() {
            warn!("Rejecting result link {}: {}", index, link.url);
            return Err(StorageError::validation(format!(
                "Result link {} url is invalid [{}]",
                index, link.url
            )));
        }
    }
    Ok(())
}
