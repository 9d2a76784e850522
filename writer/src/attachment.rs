use std::fmt;
use std::path::{Path, PathBuf};

/// A file or directory to store alongside a result.
///
/// `path` is the relative location the backend stores the file under; when
/// unset a file keeps its own name and a directory its own directory name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    file: PathBuf,
    path: Option<String>,
    content_type: Option<String>,
}

impl Attachment {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            path: None,
            content_type: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Declared path without leading or trailing slashes. Empty paths count as
    /// undeclared.
    pub fn trimmed_path(&self) -> Option<&str> {
        self.path
            .as_deref()
            .map(|path| path.trim_matches('/'))
            .filter(|path| !path.is_empty())
    }

    /// Relative path the attachment is stored under: the trimmed declared
    /// path, or the file name.
    pub fn target_path(&self) -> String {
        match self.trimmed_path() {
            Some(path) => path.to_string(),
            None => self
                .file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Expands a directory into one attachment per regular file below it,
    /// each placed under this attachment's target path. A plain file yields
    /// itself.
    pub fn expand(&self) -> std::io::Result<Vec<Attachment>> {
        if !self.file.is_dir() {
            return Ok(vec![self.clone()]);
        }

        let root = self.target_path();
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.file).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.file)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let mut leaf = Attachment::new(entry.path()).with_path(format!("{}/{}", root, relative));
            leaf.content_type = self.content_type.clone();
            files.push(leaf);
        }
        Ok(files)
    }
}

impl From<PathBuf> for Attachment {
    fn from(file: PathBuf) -> Self {
        Self::new(file)
    }
}

impl From<&Path> for Attachment {
    fn from(file: &Path) -> Self {
        Self::new(file)
    }
}

impl From<&str> for Attachment {
    fn from(file: &str) -> Self {
        Self::new(file)
    }
}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file.display())?;
        if let Some(path) = &self.path {
            write!(f, " as {}", path)?;
        }
        Ok(())
    }
}
