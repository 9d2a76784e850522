//! Layered configuration for the result writer.
//!
//! A setting is resolved from, in priority order: an explicit value supplied
//! by the caller, the configuration sources passed to the call (in order),
//! the [`Overrides`] context and finally the built-in default of the setting.
//!
//! ```rust
//! use writer::config::{Configuration, Overrides, Resolver, Setting};
//!
//! let suite = Configuration::new().with_label("nightly").with_suite("checkout");
//! let test = Configuration::new().with_label("payments").with_suite("checkout-eu");
//! let overrides = Overrides::new();
//! let resolver = Resolver::new(&overrides);
//!
//! let labels = resolver.texts(Setting::Labels, &[&suite, &test]).unwrap();
//! assert_eq!(labels, vec!["nightly", "payments"]);
//!
//! let name = resolver.text(Setting::Suite, &[&suite, &test], None).unwrap();
//! assert_eq!(name.as_deref(), Some("checkout-eu"));
//! ```

use crate::storage::{StorageError, StorageResult};
use crate::types::{ResultLink, TestSeverity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Prefix of override keys given as properties, e.g. `reesmo.basedir`.
pub const PROPERTY_PREFIX: &str = "reesmo.";

/// Prefix of override keys read from the environment, e.g. `REESMO_BASEDIR`.
pub const ENV_PREFIX: &str = "REESMO_";

pub const DEFAULT_BASE_DIR: &str = "reesmo-output";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Filesystem,
    Restapi,
    Dummy,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Restapi => "restapi",
            Self::Dummy => "dummy",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filesystem" | "FileSystemStorage" => Ok(Self::Filesystem),
            "restapi" | "RestApiStorage" => Ok(Self::Restapi),
            "dummy" | "DummyStorage" => Ok(Self::Dummy),
            other => Err(format!("Unsupported storage type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    Enabled,
    Storage,
    BaseDir,
    ProjectId,
    ProjectKey,
    Suite,
    SuiteId,
    Job,
    JobId,
    Endpoint,
    Username,
    Password,
    Milestone,
    Name,
    Description,
    Environment,
    Author,
    Severity,
    Labels,
    Notes,
    Links,
}

/// How values declared by several sources combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulation {
    /// The last declared value wins.
    Replace,
    /// Declared lists are concatenated in encounter order.
    Concatenate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Backend(BackendKind),
    Path(PathBuf),
    Text(String),
    Severity(TestSeverity),
    Texts(Vec<String>),
    Links(Vec<ResultLink>),
}

impl SettingValue {
    fn concat(self, other: SettingValue) -> SettingValue {
        match (self, other) {
            (Self::Texts(mut a), Self::Texts(b)) => {
                a.extend(b);
                Self::Texts(a)
            }
            (Self::Links(mut a), Self::Links(b)) => {
                a.extend(b);
                Self::Links(a)
            }
            (_, other) => other,
        }
    }

    pub fn into_bool(self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_backend(self) -> Option<BackendKind> {
        match self {
            Self::Backend(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_path(self) -> Option<PathBuf> {
        match self {
            Self::Path(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_severity(self) -> Option<TestSeverity> {
        match self {
            Self::Severity(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_texts(self) -> Option<Vec<String>> {
        match self {
            Self::Texts(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_links(self) -> Option<Vec<ResultLink>> {
        match self {
            Self::Links(value) => Some(value),
            _ => None,
        }
    }
}

struct SettingDef {
    setting: Setting,
    key: &'static str,
    parse: fn(&str) -> Result<SettingValue, String>,
    accumulation: Accumulation,
}

#[rustfmt::skip]
const SETTINGS: [SettingDef; 21] = [
    SettingDef { setting: Setting::Enabled, key: "enabled", parse: parse_bool, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Storage, key: "storage", parse: parse_backend, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::BaseDir, key: "basedir", parse: parse_path, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::ProjectId, key: "projectid", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::ProjectKey, key: "projectkey", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Suite, key: "suite", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::SuiteId, key: "suiteid", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Job, key: "job", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::JobId, key: "jobid", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Endpoint, key: "endpoint", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Username, key: "username", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Password, key: "password", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Milestone, key: "milestone", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Name, key: "name", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Description, key: "description", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Environment, key: "environment", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Author, key: "author", parse: parse_text, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Severity, key: "severity", parse: parse_severity, accumulation: Accumulation::Replace },
    SettingDef { setting: Setting::Labels, key: "labels", parse: parse_texts, accumulation: Accumulation::Concatenate },
    SettingDef { setting: Setting::Notes, key: "notes", parse: parse_texts, accumulation: Accumulation::Concatenate },
    SettingDef { setting: Setting::Links, key: "links", parse: parse_links, accumulation: Accumulation::Concatenate },
];

impl Setting {
    pub const ALL: [Setting; 21] = [
        Setting::Enabled,
        Setting::Storage,
        Setting::BaseDir,
        Setting::ProjectId,
        Setting::ProjectKey,
        Setting::Suite,
        Setting::SuiteId,
        Setting::Job,
        Setting::JobId,
        Setting::Endpoint,
        Setting::Username,
        Setting::Password,
        Setting::Milestone,
        Setting::Name,
        Setting::Description,
        Setting::Environment,
        Setting::Author,
        Setting::Severity,
        Setting::Labels,
        Setting::Notes,
        Setting::Links,
    ];

    fn def(self) -> &'static SettingDef {
        &SETTINGS[self as usize]
    }

    /// Override key without namespace, e.g. `basedir`.
    pub fn key(self) -> &'static str {
        self.def().key
    }

    pub fn accumulation(self) -> Accumulation {
        self.def().accumulation
    }

    pub fn from_key(key: &str) -> Option<Setting> {
        SETTINGS.iter().find(|def| def.key == key).map(|def| def.setting)
    }

    pub fn parse(self, raw: &str) -> StorageResult<SettingValue> {
        (self.def().parse)(raw).map_err(|message| StorageError::Configuration {
            message: format!("Invalid value for {}{}: {}", PROPERTY_PREFIX, self.key(), message),
        })
    }

    /// Built-in value used when neither sources nor overrides declare one.
    pub fn default_value(self) -> Option<SettingValue> {
        match self {
            Setting::Enabled => Some(SettingValue::Bool(true)),
            Setting::Storage => Some(SettingValue::Backend(BackendKind::default())),
            Setting::BaseDir => {
                let base = std::env::current_dir().unwrap_or_default();
                Some(SettingValue::Path(base.join(DEFAULT_BASE_DIR)))
            }
            Setting::Severity => Some(SettingValue::Severity(TestSeverity::default())),
            Setting::Labels | Setting::Notes => Some(SettingValue::Texts(Vec::new())),
            Setting::Links => Some(SettingValue::Links(Vec::new())),
            _ => None,
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PROPERTY_PREFIX, self.key())
    }
}

fn parse_bool(raw: &str) -> Result<SettingValue, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(SettingValue::Bool(true)),
        "false" | "no" | "0" => Ok(SettingValue::Bool(false)),
        other => Err(format!("expected yes/no/true/false/1/0, got '{}'", other)),
    }
}

fn parse_backend(raw: &str) -> Result<SettingValue, String> {
    raw.trim().parse().map(SettingValue::Backend)
}

fn parse_path(raw: &str) -> Result<SettingValue, String> {
    Ok(SettingValue::Path(PathBuf::from(raw)))
}

fn parse_text(raw: &str) -> Result<SettingValue, String> {
    Ok(SettingValue::Text(raw.to_string()))
}

fn parse_severity(raw: &str) -> Result<SettingValue, String> {
    raw.parse().map(SettingValue::Severity)
}

fn parse_texts(raw: &str) -> Result<SettingValue, String> {
    Ok(SettingValue::Texts(
        raw.split(';')
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect(),
    ))
}

fn parse_links(raw: &str) -> Result<SettingValue, String> {
    Ok(SettingValue::Links(
        raw.split(';')
            .filter(|entry| !entry.is_empty())
            .map(ResultLink::parse)
            .collect(),
    ))
}

/// Connection parameters of the REST backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestApiConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
}

impl RestApiConfig {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Endpoint without trailing slashes.
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("Endpoint cannot be empty".to_string());
        }

        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err("Endpoint must start with http:// or https://".to_string());
        }

        if self.username.is_empty() {
            return Err("Username cannot be empty".to_string());
        }

        if self.password.is_empty() {
            return Err("Password cannot be empty".to_string());
        }

        Ok(())
    }
}

/// Overridable defaults declared for a call site or a type.
///
/// Every field is optional; undeclared fields fall through to the next source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Configuration {
    pub enabled: Option<bool>,
    pub storage: Option<BackendKind>,
    pub base_dir: Option<PathBuf>,
    pub project_id: Option<String>,
    pub project_key: Option<String>,
    pub suite: Option<String>,
    pub suite_id: Option<String>,
    pub job: Option<String>,
    pub job_id: Option<String>,
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub milestone: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub environment: Option<String>,
    pub author: Option<String>,
    pub severity: Option<TestSeverity>,
    pub labels: Vec<String>,
    pub notes: Vec<String>,
    pub links: Vec<ResultLink>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> StorageResult<Self> {
        toml::from_str(content).map_err(|e| StorageError::Configuration {
            message: format!("Invalid configuration file: {}", e),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| StorageError::Configuration {
            message: format!("Unable to read configuration file {}: {}", path.display(), e),
        })?;
        debug!("Loaded configuration file {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn with_storage(mut self, storage: BackendKind) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_project_key(mut self, project_key: impl Into<String>) -> Self {
        self.project_key = Some(project_key.into());
        self
    }

    pub fn with_suite(mut self, suite: impl Into<String>) -> Self {
        self.suite = Some(suite.into());
        self
    }

    pub fn with_suite_id(mut self, suite_id: impl Into<String>) -> Self {
        self.suite_id = Some(suite_id.into());
        self
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_milestone(mut self, milestone: impl Into<String>) -> Self {
        self.milestone = Some(milestone.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
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

    pub fn with_severity(mut self, severity: TestSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_link(mut self, link: ResultLink) -> Self {
        self.links.push(link);
        self
    }

    /// Value this configuration declares for `setting`. Empty lists count as
    /// undeclared.
    pub fn declared(&self, setting: Setting) -> Option<SettingValue> {
        let text = |value: &Option<String>| value.clone().map(SettingValue::Text);
        match setting {
            Setting::Enabled => self.enabled.map(SettingValue::Bool),
            Setting::Storage => self.storage.map(SettingValue::Backend),
            Setting::BaseDir => self.base_dir.clone().map(SettingValue::Path),
            Setting::ProjectId => text(&self.project_id),
            Setting::ProjectKey => text(&self.project_key),
            Setting::Suite => text(&self.suite),
            Setting::SuiteId => text(&self.suite_id),
            Setting::Job => text(&self.job),
            Setting::JobId => text(&self.job_id),
            Setting::Endpoint => text(&self.endpoint),
            Setting::Username => text(&self.username),
            Setting::Password => text(&self.password),
            Setting::Milestone => text(&self.milestone),
            Setting::Name => text(&self.name),
            Setting::Description => text(&self.description),
            Setting::Environment => text(&self.environment),
            Setting::Author => text(&self.author),
            Setting::Severity => self.severity.map(SettingValue::Severity),
            Setting::Labels if !self.labels.is_empty() => {
                Some(SettingValue::Texts(self.labels.clone()))
            }
            Setting::Notes if !self.notes.is_empty() => Some(SettingValue::Texts(self.notes.clone())),
            Setting::Links if !self.links.is_empty() => Some(SettingValue::Links(self.links.clone())),
            Setting::Labels | Setting::Notes | Setting::Links => None,
        }
    }
}

/// Anything that may carry a [`Configuration`].
///
/// Implement this for a test suite or fixture type to attach defaults to it;
/// returning `None` means the type declares nothing.
pub trait ConfigurationSource {
    fn configuration(&self) -> Option<&Configuration>;
}

impl ConfigurationSource for Configuration {
    fn configuration(&self) -> Option<&Configuration> {
        Some(self)
    }
}

impl<T: ConfigurationSource> ConfigurationSource for Option<T> {
    fn configuration(&self) -> Option<&Configuration> {
        self.as_ref().and_then(|source| source.configuration())
    }
}

impl<T: ConfigurationSource + ?Sized> ConfigurationSource for &T {
    fn configuration(&self) -> Option<&Configuration> {
        (**self).configuration()
    }
}

/// Process-level string overrides, consulted after all configuration sources.
///
/// Values are kept raw and parsed on lookup, so a malformed override only
/// fails the resolution that needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    values: HashMap<Setting, String>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `REESMO_*` variables from the process environment. Variables
    /// whose name or value is not valid unicode are skipped.
    pub fn from_env() -> Self {
        Self::from_env_os(std::env::vars_os())
    }

    fn from_env_os<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        Self::from_env_vars(vars.into_iter().filter_map(|(key, value)| {
            match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (key, _) => {
                    debug!("Skipping environment variable with non-unicode content: {:?}", key);
                    None
                }
            }
        }))
    }

    pub fn from_env_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut overrides = Self::new();
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if let Some(setting) = Setting::from_key(&name.to_ascii_lowercase()) {
                overrides.values.insert(setting, value.into());
            }
        }
        overrides
    }

    /// Reads `reesmo.*` keys, e.g. from a properties file already split into pairs.
    pub fn from_properties<I, K, V>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut overrides = Self::new();
        for (key, value) in properties {
            let setting = key
                .as_ref()
                .strip_prefix(PROPERTY_PREFIX)
                .and_then(Setting::from_key);
            if let Some(setting) = setting {
                overrides.values.insert(setting, value.into());
            }
        }
        overrides
    }

    pub fn with(mut self, setting: Setting, value: impl Into<String>) -> Self {
        self.values.insert(setting, value.into());
        self
    }

    pub fn raw(&self, setting: Setting) -> Option<&str> {
        self.values.get(&setting).map(String::as_str)
    }

    pub fn get(&self, setting: Setting) -> StorageResult<Option<SettingValue>> {
        self.raw(setting).map(|raw| setting.parse(raw)).transpose()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub struct Resolver<'a> {
    overrides: &'a Overrides,
}

impl<'a> Resolver<'a> {
    pub fn new(overrides: &'a Overrides) -> Self {
        Self { overrides }
    }

    /// Resolves `setting`, returning `explicit` untouched when it is present.
    pub fn resolve(
        &self,
        setting: Setting,
        sources: &[&dyn ConfigurationSource],
        explicit: Option<SettingValue>,
    ) -> StorageResult<Option<SettingValue>> {
        if explicit.is_some() {
            return Ok(explicit);
        }

        let mut value: Option<SettingValue> = None;
        for source in sources {
            let Some(declared) = source.configuration().and_then(|c| c.declared(setting)) else {
                continue;
            };
            value = match (setting.accumulation(), value) {
                (Accumulation::Concatenate, Some(current)) => Some(current.concat(declared)),
                _ => Some(declared),
            };
        }

        if value.is_none() {
            value = self.overrides.get(setting)?;
        }

        Ok(value.or_else(|| setting.default_value()))
    }

    pub fn flag(&self, setting: Setting, sources: &[&dyn ConfigurationSource]) -> StorageResult<bool> {
        Ok(self
            .resolve(setting, sources, None)?
            .and_then(SettingValue::into_bool)
            .unwrap_or(false))
    }

    pub fn backend(&self, sources: &[&dyn ConfigurationSource]) -> StorageResult<BackendKind> {
        Ok(self
            .resolve(Setting::Storage, sources, None)?
            .and_then(SettingValue::into_backend)
            .unwrap_or_default())
    }

    pub fn path(
        &self,
        setting: Setting,
        sources: &[&dyn ConfigurationSource],
    ) -> StorageResult<Option<PathBuf>> {
        Ok(self
            .resolve(setting, sources, None)?
            .and_then(SettingValue::into_path))
    }

    pub fn text(
        &self,
        setting: Setting,
        sources: &[&dyn ConfigurationSource],
        explicit: Option<String>,
    ) -> StorageResult<Option<String>> {
        Ok(self
            .resolve(setting, sources, explicit.map(SettingValue::Text))?
            .and_then(SettingValue::into_text))
    }

    pub fn severity(
        &self,
        sources: &[&dyn ConfigurationSource],
        explicit: Option<TestSeverity>,
    ) -> StorageResult<Option<TestSeverity>> {
        Ok(self
            .resolve(Setting::Severity, sources, explicit.map(SettingValue::Severity))?
            .and_then(SettingValue::into_severity))
    }

    pub fn texts(
        &self,
        setting: Setting,
        sources: &[&dyn ConfigurationSource],
    ) -> StorageResult<Vec<String>> {
        Ok(self
            .resolve(setting, sources, None)?
            .and_then(SettingValue::into_texts)
            .unwrap_or_default())
    }

    pub fn links(&self, sources: &[&dyn ConfigurationSource]) -> StorageResult<Vec<ResultLink>> {
        Ok(self
            .resolve(Setting::Links, sources, None)?
            .and_then(SettingValue::into_links)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CheckoutSuite {
        configuration: Configuration,
    }

    impl ConfigurationSource for CheckoutSuite {
        fn configuration(&self) -> Option<&Configuration> {
            Some(&self.configuration)
        }
    }

    struct Undeclared;

    impl ConfigurationSource for Undeclared {
        fn configuration(&self) -> Option<&Configuration> {
            None
        }
    }

    #[test]
    fn test_settings_table_matches_enum_order() {
        for (index, setting) in Setting::ALL.iter().enumerate() {
            assert_eq!(SETTINGS[index].setting, *setting);
            assert_eq!(Setting::from_key(setting.key()), Some(*setting));
        }
    }

    #[test]
    fn test_later_source_wins_for_scalars() {
        let overrides = Overrides::new();
        let resolver = Resolver::new(&overrides);
        let first = Configuration::new().with_suite("first").with_author("alice");
        let second = Configuration::new().with_suite("second");

        let suite = resolver.text(Setting::Suite, &[&first, &second], None).unwrap();
        assert_eq!(suite.as_deref(), Some("second"));

        let author = resolver.text(Setting::Author, &[&first, &second], None).unwrap();
        assert_eq!(author.as_deref(), Some("alice"));
    }

    #[test]
    fn test_lists_accumulate_in_order() {
        let overrides = Overrides::new();
        let resolver = Resolver::new(&overrides);
        let first = Configuration::new().with_label("a").with_label("b");
        let empty = Configuration::new();
        let second = Configuration::new().with_label("b").with_label("c");

        let labels = resolver
            .texts(Setting::Labels, &[&first, &empty, &second])
            .unwrap();
        assert_eq!(labels, vec!["a", "b", "b", "c"]);
    }

    #[test]
    fn test_explicit_value_wins() {
        let overrides = Overrides::new().with(Setting::Name, "from override");
        let resolver = Resolver::new(&overrides);
        let source = Configuration::new().with_name("from source");

        let name = resolver
            .text(Setting::Name, &[&source], Some("explicit".to_string()))
            .unwrap();
        assert_eq!(name.as_deref(), Some("explicit"));
    }

    #[test]
    fn test_override_used_when_sources_are_silent() {
        let overrides = Overrides::new()
            .with(Setting::Suite, "from override")
            .with(Setting::Labels, "x;;y");
        let resolver = Resolver::new(&overrides);
        let suite_type = CheckoutSuite {
            configuration: Configuration::new().with_author("bob"),
        };

        let suite = resolver
            .text(Setting::Suite, &[&suite_type, &Undeclared], None)
            .unwrap();
        assert_eq!(suite.as_deref(), Some("from override"));
        assert_eq!(resolver.texts(Setting::Labels, &[]).unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn test_source_beats_override() {
        let overrides = Overrides::new().with(Setting::Suite, "from override");
        let resolver = Resolver::new(&overrides);
        let source = Some(Configuration::new().with_suite("from source"));

        let suite = resolver.text(Setting::Suite, &[&source], None).unwrap();
        assert_eq!(suite.as_deref(), Some("from source"));
    }

    #[test]
    fn test_defaults() {
        let overrides = Overrides::new();
        let resolver = Resolver::new(&overrides);

        assert!(resolver.flag(Setting::Enabled, &[]).unwrap());
        assert_eq!(resolver.backend(&[]).unwrap(), BackendKind::Filesystem);
        assert_eq!(resolver.severity(&[], None).unwrap(), Some(TestSeverity::Normal));
        assert!(resolver
            .path(Setting::BaseDir, &[])
            .unwrap()
            .unwrap()
            .ends_with(DEFAULT_BASE_DIR));
        assert_eq!(resolver.text(Setting::Endpoint, &[], None).unwrap(), None);
    }

    #[test]
    fn test_bool_grammar() {
        for raw in ["yes", "TRUE", "1", " true "] {
            assert_eq!(Setting::Enabled.parse(raw).unwrap(), SettingValue::Bool(true));
        }
        for raw in ["no", "False", "0"] {
            assert_eq!(Setting::Enabled.parse(raw).unwrap(), SettingValue::Bool(false));
        }
        assert!(matches!(
            Setting::Enabled.parse("maybe"),
            Err(StorageError::Configuration { .. })
        ));
    }

    #[test]
    fn test_link_override_parsing() {
        let overrides = Overrides::new().with(
            Setting::Links,
            "Jira|https://jira.example.com/T-1;https://ci.example.com/42",
        );
        let resolver = Resolver::new(&overrides);

        let links = resolver.links(&[]).unwrap();
        assert_eq!(
            links,
            vec![
                ResultLink::named("Jira", "https://jira.example.com/T-1"),
                ResultLink::new("https://ci.example.com/42"),
            ]
        );
    }

    #[test]
    fn test_invalid_override_is_configuration_error() {
        let overrides = Overrides::new().with(Setting::Severity, "normal");
        let resolver = Resolver::new(&overrides);
        assert!(matches!(
            resolver.severity(&[], None),
            Err(StorageError::Configuration { .. })
        ));

        let overrides = Overrides::new().with(Setting::Storage, "s3");
        let resolver = Resolver::new(&overrides);
        assert!(resolver.backend(&[]).is_err());
    }

    #[test]
    fn test_backend_names() {
        assert_eq!("restapi".parse(), Ok(BackendKind::Restapi));
        assert_eq!("RestApiStorage".parse(), Ok(BackendKind::Restapi));
        assert_eq!("DummyStorage".parse(), Ok(BackendKind::Dummy));
        assert_eq!("filesystem".parse(), Ok(BackendKind::Filesystem));
    }

    #[test]
    fn test_env_and_property_overrides() {
        let overrides = Overrides::from_env_vars(vec![
            ("REESMO_BASEDIR", "/tmp/out"),
            ("REESMO_PROJECTKEY", "proj1"),
            ("HOME", "/root"),
        ]);
        assert_eq!(overrides.raw(Setting::BaseDir), Some("/tmp/out"));
        assert_eq!(overrides.raw(Setting::ProjectKey), Some("proj1"));

        let overrides = Overrides::from_properties(vec![
            ("reesmo.enabled", "no"),
            ("reesmo.unknown", "x"),
            ("other.enabled", "yes"),
        ]);
        assert_eq!(overrides.raw(Setting::Enabled), Some("no"));
        assert_eq!(overrides.values.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_unicode_env_vars_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let overrides = Overrides::from_env_os(vec![
            (OsString::from("REESMO_SUITE"), OsString::from_vec(vec![0x66, 0xff])),
            (OsString::from_vec(vec![0xfe, 0x41]), OsString::from("x")),
            (OsString::from("REESMO_JOB"), OsString::from("nightly")),
        ]);
        assert_eq!(overrides.raw(Setting::Suite), None);
        assert_eq!(overrides.raw(Setting::Job), Some("nightly"));
        assert_eq!(overrides.values.len(), 1);
    }

    #[test]
    fn test_rest_api_config_validation() {
        let mut config = RestApiConfig::new("https://reesmo.example.com//", "ci", "secret");
        assert!(config.validate().is_ok());
        assert_eq!(config.base_url(), "https://reesmo.example.com");

        config.endpoint = "".to_string();
        assert!(config.validate().is_err());

        config.endpoint = "reesmo.example.com".to_string();
        assert!(config.validate().is_err());

        config.endpoint = "http://localhost:8080".to_string();
        config.username = "".to_string();
        assert!(config.validate().is_err());

        config.username = "ci".to_string();
        config.password = "".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_configuration() {
        let config = Configuration::from_toml_str(
            r#"
            storage = "restapi"
            endpoint = "https://reesmo.example.com"
            username = "ci"
            password = "secret"
            severity = "MAJOR"
            labels = ["nightly"]
            links = [{ name = "CI", url = "https://ci.example.com" }]
            "#,
        )
        .unwrap();

        assert_eq!(config.storage, Some(BackendKind::Restapi));
        assert_eq!(config.severity, Some(TestSeverity::Major));
        assert_eq!(config.labels, vec!["nightly"]);
        assert_eq!(config.links[0].name.as_deref(), Some("CI"));

        assert!(Configuration::from_toml_str("storage = \"ftp\"").is_err());
    }
}
