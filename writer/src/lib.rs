pub mod attachment;
pub mod config;
pub mod filesystem;
pub mod rest;
pub mod storage;
pub mod types;

pub use attachment::Attachment;
pub use config::{
    BackendKind, Configuration, ConfigurationSource, Overrides, Resolver, RestApiConfig, Setting,
    SettingValue,
};
pub use filesystem::FileSystemStorage;
pub use rest::RestApiStorage;
pub use storage::{
    validate_result, DummyStorage, Storage, StorageBackend, StorageError, StorageResult,
};
pub use types::{ResultAttachment, ResultLink, TestResult, TestSeverity, TestStatus};

pub mod prelude {
    pub use crate::attachment::*;
    pub use crate::config::*;
    pub use crate::filesystem::*;
    pub use crate::rest::*;
    pub use crate::storage::*;
    pub use crate::types::*;
}
