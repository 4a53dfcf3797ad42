use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::trace;

use crate::error::{FileSystemError, FileSystemResult};

/// Removes the specified file or directory, treating a missing path as success.
///
/// Directories are removed recursively.
///
/// # Errors
///
/// Returns a [`FileSystemError::File`] if the removal fails for any reason other than the path
/// not existing.
pub fn safe_remove<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    let path = path.as_ref();

    if !path.exists() {
        return Ok(());
    }

    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    result.map_err(|err| {
        FileSystemError::File {
            path: path.to_path_buf(),
            action: "remove",
            source: err,
        }
    })
}

/// Creates a directory structure if it doesn't exist.
///
/// # Errors
///
/// * [`FileSystemError::Directory`] if the directory could not be created.
/// * [`FileSystemError::NotADirectory`] if the path exists but is not a directory.
pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path).map_err(|err| {
            FileSystemError::Directory {
                path: path.to_path_buf(),
                action: "create",
                source: err,
            }
        })?;
    } else if !path.is_dir() {
        return Err(FileSystemError::NotADirectory {
            path: path.to_path_buf(),
        });
    }

    Ok(())
}

/// Hands out scratch files for downloads.
///
/// The returned file exists and is empty. Ownership passes to the caller, which is responsible
/// for deleting it on every exit path.
pub trait TempFileProvider: Send + Sync {
    fn create_temp_file(&self) -> FileSystemResult<PathBuf>;
}

/// A [`TempFileProvider`] that creates uniquely named files inside one directory.
#[derive(Debug, Clone)]
pub struct DirTempFileProvider {
    dir: PathBuf,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl DirTempFileProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TempFileProvider for DirTempFileProvider {
    fn create_temp_file(&self) -> FileSystemResult<PathBuf> {
        ensure_dir_exists(&self.dir)?;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default();

        loop {
            let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = self
                .dir
                .join(format!("dl-{}-{nanos:08x}-{seq}.tmp", std::process::id()));

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    trace!("created temp file {}", path.display());
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(FileSystemError::File {
                        path,
                        action: "create",
                        source: err,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_safe_remove_file_and_missing() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("entry.jar");
        fs::write(&file_path, "jar").unwrap();

        safe_remove(&file_path).unwrap();
        assert!(!file_path.exists());
        safe_remove(&file_path).unwrap();
    }

    #[test]
    fn test_safe_remove_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("f"), "x").unwrap();

        safe_remove(dir.path().join("a")).unwrap();
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn test_ensure_dir_exists_on_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("file");
        fs::write(&file_path, "x").unwrap();

        assert!(matches!(
            ensure_dir_exists(&file_path),
            Err(FileSystemError::NotADirectory { .. })
        ));
    }

    #[test]
    fn test_temp_file_provider_unique_files() {
        let dir = tempdir().unwrap();
        let provider = DirTempFileProvider::new(dir.path().join("tmp"));

        let first = provider.create_temp_file().unwrap();
        let second = provider.create_temp_file().unwrap();

        assert_ne!(first, second);
        assert!(first.is_file());
        assert!(second.is_file());
        assert_eq!(fs::metadata(&first).unwrap().len(), 0);
        assert!(first.starts_with(provider.dir()));
    }
}
