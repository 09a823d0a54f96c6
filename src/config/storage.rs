use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// File-system primitives the configuration registry is persisted through.
pub trait ConfigStorage {
    fn home_dir(&self) -> io::Result<PathBuf>;
    fn absolute(&self, path: &Path) -> io::Result<PathBuf>;
    fn exists(&self, path: &Path) -> bool;
    /// Read the whole file without creating it or touching its permissions.
    fn read(&self, path: &Path) -> io::Result<String>;
    /// Open for writing, creating the file and its parent directories.
    fn open(&self, path: &Path) -> io::Result<Box<dyn ConfigHandle>>;
}

/// A configuration file opened for writing.
pub trait ConfigHandle {
    fn truncate(&mut self) -> io::Result<()>;
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

#[cfg(unix)]
fn chmod_best_effort(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let perm = std::fs::Permissions::from_mode(mode);
    let _ = std::fs::set_permissions(path, perm);
}

impl ConfigStorage for FsStorage {
    fn home_dir(&self) -> io::Result<PathBuf> {
        crate::paths::user_home_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "home directory not found"))
    }

    fn absolute(&self, path: &Path) -> io::Result<PathBuf> {
        std::path::absolute(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn ConfigHandle>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        // Profiles may carry tokens and passwords.
        #[cfg(unix)]
        chmod_best_effort(path, 0o600);
        Ok(Box::new(FsHandle { file }))
    }
}

struct FsHandle {
    file: File,
}

impl ConfigHandle for FsHandle {
    fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.file.flush()
    }
}
