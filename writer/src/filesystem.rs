//! Stores results as directories below a base directory.
//!
//! Each result gets its own directory named after the creation time in epoch
//! milliseconds:
//!
//! ```text
//! <base>/<millis>[-N]/
//!     result.json
//!     projectkey       (only when a project key was given)
//!     attachments/...  (only when attachments were given)
//!     ready            (written last)
//! ```
//!
//! Consumers must ignore directories without the `ready` marker; they are
//! still being written or their creation failed.

use crate::attachment::Attachment;
use crate::storage::{StorageBackend, StorageError, StorageResult, WithContext};
use crate::types::TestResult;
use chrono::Utc;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const RESULT_FILE: &str = "result.json";
pub const PROJECT_KEY_FILE: &str = "projectkey";
pub const READY_FILE: &str = "ready";
pub const ATTACHMENTS_DIR: &str = "attachments";

#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    base_dir: PathBuf,
}

impl FileSystemStorage {
    /// Opens `base_dir`, creating it when missing. It must be a directory
    /// whose permissions are not read-only. Ownership is not checked.
    pub fn new(base_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).map_err(|e| {
                StorageError::configuration(format!(
                    "Base directory does not exist and can not be created: {}: {}",
                    base_dir.display(),
                    e
                ))
            })?;
            info!("Base directory was created: {}", base_dir.display());
        }
        if !base_dir.is_dir() {
            return Err(StorageError::configuration(format!(
                "Base directory is not a directory: {}",
                base_dir.display()
            )));
        }
        if is_read_only(&base_dir) {
            return Err(StorageError::configuration(format!(
                "Base directory is read-only: {}",
                base_dir.display()
            )));
        }
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Creates `<base>/<stamp>`, appending `-1`, `-2`, ... while the name is
    /// taken.
    fn create_result_dir(&self, stamp: i64) -> StorageResult<PathBuf> {
        let mut increment = 0u32;
        loop {
            let name = if increment == 0 {
                stamp.to_string()
            } else {
                format!("{}-{}", stamp, increment)
            };
            let dir = self.base_dir.join(name);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    info!("Result directory created: {}", dir.display());
                    return Ok(dir);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => increment += 1,
                Err(e) => {
                    return Err(e).context(format!(
                        "Unable to create result directory {}",
                        dir.display()
                    ))
                }
            }
        }
    }

    fn write_result_file(&self, dir: &Path, result: &TestResult) -> StorageResult<()> {
        let path = dir.join(RESULT_FILE);
        let file = File::create(&path).context("Unable to create result json file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, result).context("Unable to create result json file")?;
        writer.flush().context("Unable to create result json file")?;
        info!("Result json file created: {}", path.display());
        Ok(())
    }

    fn write_project_key_file(&self, dir: &Path, project_key: &str) -> StorageResult<()> {
        let path = dir.join(PROJECT_KEY_FILE);
        fs::write(&path, project_key).context("Unable to create result project key file")?;
        info!("Result project key file created: {}", path.display());
        Ok(())
    }

    fn copy_attachments(&self, dir: &Path, attachments: &[Attachment]) -> StorageResult<()> {
        let attachment_dir = dir.join(ATTACHMENTS_DIR);
        fs::create_dir_all(&attachment_dir)
            .context("Unable to create result attachment directory")?;
        info!(
            "Result attachment directory created: {}",
            attachment_dir.display()
        );

        for attachment in attachments {
            let files = attachment.expand().context(format!(
                "Unable to read result attachment: {}",
                attachment
            ))?;
            for file in files {
                let target = contained_path(&attachment_dir, &file.target_path())?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).context(format!(
                        "Unable to copy result attachment file: {}",
                        file
                    ))?;
                }
                fs::copy(file.file(), &target)
                    .context(format!("Unable to copy result attachment file: {}", file))?;
                debug!("Result attachment copied to {}", target.display());
            }
        }
        Ok(())
    }

    fn write_ready_file(&self, dir: &Path) -> StorageResult<()> {
        let path = dir.join(READY_FILE);
        File::create(&path).context("Unable to create result ready file")?;
        info!("Result ready file created: {}", path.display());
        Ok(())
    }

    /// Id of a result directory: its path relative to the base directory with
    /// `/` separators.
    fn result_id(&self, dir: &Path) -> StorageResult<String> {
        let relative = dir.strip_prefix(&self.base_dir).map_err(|_| {
            StorageError::backend(format!(
                "Result directory {} is outside of {}",
                dir.display(),
                self.base_dir.display()
            ))
        })?;
        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    fn result_dir(&self, id: &str) -> StorageResult<PathBuf> {
        let dir = contained_path(&self.base_dir, id)?;
        if !dir.exists() {
            return Err(StorageError::backend(format!(
                "Result directory does not exist: {}",
                dir.display()
            )));
        }
        if !dir.is_dir() {
            return Err(StorageError::backend(format!(
                "Result directory is not a directory: {}",
                dir.display()
            )));
        }
        if is_read_only(&dir) {
            return Err(StorageError::backend(format!(
                "Result directory is read-only: {}",
                dir.display()
            )));
        }
        Ok(dir)
    }
}

impl StorageBackend for FileSystemStorage {
    fn create_result(
        &self,
        project_key: Option<&str>,
        result: &mut TestResult,
        attachments: &[Attachment],
    ) -> StorageResult<()> {
        let dir = self.create_result_dir(Utc::now().timestamp_millis())?;

        self.write_result_file(&dir, result)?;
        if let Some(project_key) = project_key {
            self.write_project_key_file(&dir, project_key)?;
        }
        if !attachments.is_empty() {
            self.copy_attachments(&dir, attachments)?;
        }
        self.write_ready_file(&dir)?;

        result.set_id(self.result_id(&dir)?);
        Ok(())
    }

    fn delete_result(&self, result: &TestResult) -> StorageResult<()> {
        let id = result.id().ok_or_else(|| {
            StorageError::backend("Result not found, it must be added before deleting")
        })?;
        let dir = self.result_dir(id)?;
        info!("Deleting result directory: {}", dir.display());
        remove_tree(&dir)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

/// Removes `dir` and everything below it. Keeps going past entries that
/// cannot be removed and reports all of them at the end.
fn remove_tree(dir: &Path) -> StorageResult<()> {
    let mut failed = Vec::new();
    for entry in WalkDir::new(dir).contents_first(true) {
        match entry {
            Ok(entry) => {
                let removed = if entry.file_type().is_dir() {
                    fs::remove_dir(entry.path())
                } else {
                    fs::remove_file(entry.path())
                };
                if let Err(e) = removed {
                    warn!("Unable to delete {}: {}", entry.path().display(), e);
                    failed.push(entry.path().display().to_string());
                }
            }
            Err(e) => {
                warn!("Unable to read directory entry: {}", e);
                failed.push(
                    e.path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| dir.display().to_string()),
                );
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(StorageError::backend(format!(
            "Unable to delete {} entries of {}: {}",
            failed.len(),
            dir.display(),
            failed.join(", ")
        )))
    }
}

/// Joins `relative` below `dir`. Empty, absolute and `..` paths are refused
/// so nothing is written or deleted outside `dir`.
fn contained_path(dir: &Path, relative: &str) -> StorageResult<PathBuf> {
    let path = Path::new(relative);
    let contained = !relative.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !contained {
        return Err(StorageError::backend(format!(
            "Path [{}] does not stay inside {}",
            relative,
            dir.display()
        )));
    }
    Ok(dir.join(path))
}

/// Only the permission bits are inspected.
fn is_read_only(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| metadata.permissions().readonly())
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TestSeverity, TestStatus};
    use chrono::TimeZone;

    fn stored_result() -> TestResult {
        TestResult::new("login test", Utc.timestamp_millis_opt(1_000).unwrap())
            .with_ended_at(Utc.timestamp_millis_opt(2_000).unwrap())
            .with_status(TestStatus::Failed)
            .with_severity(TestSeverity::Normal)
    }

    #[test]
    fn test_base_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("a/b/out");
        let storage = FileSystemStorage::new(&base).unwrap();
        assert!(base.is_dir());
        assert_eq!(storage.base_dir(), base.as_path());
    }

    #[test]
    fn test_base_dir_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, "x").unwrap();
        let err = FileSystemStorage::new(&file).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_read_only_base_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("locked");
        fs::create_dir(&base).unwrap();
        let mut permissions = fs::metadata(&base).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&base, permissions.clone()).unwrap();

        let err = FileSystemStorage::new(&base).unwrap_err();

        permissions.set_readonly(false);
        fs::set_permissions(&base, permissions).unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn test_same_millisecond_directories_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path()).unwrap();

        let first = storage.create_result_dir(1_700_000_000_000).unwrap();
        let second = storage.create_result_dir(1_700_000_000_000).unwrap();
        let third = storage.create_result_dir(1_700_000_000_000).unwrap();

        assert_eq!(storage.result_id(&first).unwrap(), "1700000000000");
        assert_eq!(storage.result_id(&second).unwrap(), "1700000000000-1");
        assert_eq!(storage.result_id(&third).unwrap(), "1700000000000-2");
    }

    #[test]
    fn test_create_result_layout() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path()).unwrap();
        let mut result = stored_result();

        storage.create_result(Some("proj1"), &mut result, &[]).unwrap();

        let id = result.id().unwrap().to_string();
        let result_dir = dir.path().join(&id);
        assert!(result_dir.join(READY_FILE).is_file());
        assert!(!result_dir.join(ATTACHMENTS_DIR).exists());
        assert_eq!(
            fs::read_to_string(result_dir.join(PROJECT_KEY_FILE)).unwrap(),
            "proj1"
        );

        let stored: TestResult =
            serde_json::from_str(&fs::read_to_string(result_dir.join(RESULT_FILE)).unwrap())
                .unwrap();
        assert!(stored.id().is_none());
        assert_eq!(stored.name, result.name);
        assert_eq!(stored.started_at, result.started_at);
        assert_eq!(stored.status, Some(TestStatus::Failed));
    }

    #[test]
    fn test_project_key_file_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path()).unwrap();
        let mut result = stored_result();

        storage.create_result(None, &mut result, &[]).unwrap();

        let result_dir = dir.path().join(result.id().unwrap());
        assert!(!result_dir.join(PROJECT_KEY_FILE).exists());
    }

    #[test]
    fn test_attachments_are_copied() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = tempfile::tempdir().unwrap();
        let screenshot = inputs.path().join("screenshot.png");
        fs::write(&screenshot, [0u8, 1, 2]).unwrap();
        let log = inputs.path().join("run.log");
        fs::write(&log, "started").unwrap();
        let reports = inputs.path().join("reports");
        fs::create_dir_all(reports.join("css")).unwrap();
        fs::write(reports.join("index.html"), "<html/>").unwrap();
        fs::write(reports.join("css/site.css"), "body{}").unwrap();

        let storage = FileSystemStorage::new(dir.path().join("out")).unwrap();
        let mut result = stored_result();
        storage
            .create_result(
                None,
                &mut result,
                &[
                    Attachment::new(&screenshot),
                    Attachment::new(&log).with_path("logs/browser/run.log"),
                    Attachment::new(&reports),
                ],
            )
            .unwrap();

        let attachments = dir
            .path()
            .join("out")
            .join(result.id().unwrap())
            .join(ATTACHMENTS_DIR);
        assert_eq!(fs::read(attachments.join("screenshot.png")).unwrap(), vec![0, 1, 2]);
        assert_eq!(
            fs::read_to_string(attachments.join("logs/browser/run.log")).unwrap(),
            "started"
        );
        assert!(attachments.join("reports/index.html").is_file());
        assert!(attachments.join("reports/css/site.css").is_file());
    }

    #[test]
    fn test_failed_copy_leaves_no_ready_marker() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path()).unwrap();
        let mut result = stored_result();

        let err = storage
            .create_result(
                None,
                &mut result,
                &[Attachment::new(dir.path().join("missing.txt"))],
            )
            .unwrap_err();

        assert!(err.to_string().contains("Unable to copy result attachment file"));
        assert!(result.id().is_none());
        let dirs: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(dirs.len(), 1);
        let result_dir = dirs[0].as_ref().unwrap().path();
        assert!(result_dir.join(RESULT_FILE).is_file());
        assert!(!result_dir.join(READY_FILE).exists());
    }

    #[test]
    fn test_delete_result() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = tempfile::tempdir().unwrap();
        let log = inputs.path().join("run.log");
        fs::write(&log, "started").unwrap();
        let storage = FileSystemStorage::new(dir.path()).unwrap();
        let mut result = stored_result();
        storage
            .create_result(Some("proj1"), &mut result, &[Attachment::new(&log).with_path("a/b/c.log")])
            .unwrap();
        let result_dir = dir.path().join(result.id().unwrap());
        assert!(result_dir.exists());

        storage.delete_result(&result).unwrap();

        assert!(!result_dir.exists());
        assert!(storage.delete_result(&result).is_err());
    }

    #[test]
    fn test_attachment_path_cannot_leave_result_directory() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("out");
        let input = dir.path().join("in.txt");
        fs::write(&input, "x").unwrap();
        let storage = FileSystemStorage::new(&base).unwrap();

        for path in ["../../../escaped.txt", "logs/../../x.txt"] {
            let mut result = stored_result();
            let err = storage
                .create_result(None, &mut result, &[Attachment::new(&input).with_path(path)])
                .unwrap_err();
            assert!(err.to_string().contains("does not stay inside"));
            assert!(result.id().is_none());
        }
        assert!(!dir.path().join("escaped.txt").exists());
        assert!(!base.join("x.txt").exists());
    }

    #[test]
    fn test_delete_refuses_ids_outside_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("out");
        let outside = dir.path().join("keep");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("data.txt"), "x").unwrap();
        let storage = FileSystemStorage::new(&base).unwrap();

        for id in ["../keep", "", "/tmp"] {
            let mut result = stored_result();
            result.set_id(id);
            let err = storage.delete_result(&result).unwrap_err();
            assert!(err.to_string().contains("does not stay inside"), "{}", err);
        }
        assert!(outside.join("data.txt").is_file());
        assert!(base.is_dir());
    }

    #[test]
    fn test_delete_requires_id() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path()).unwrap();
        let err = storage.delete_result(&stored_result()).unwrap_err();
        assert!(err.to_string().contains("must be added before deleting"));
    }
}
