use std::{
    cell::RefCell,
    collections::HashMap,
    ffi::{OsStr, OsString},
    io,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Mutex,
};

use crate::config::{Config, ConfigHandle, ConfigStorage};
use crate::transport::{HttpResponse, RequestDescriptor, Transport, TransportError};

pub static ENV_LOCK: Mutex<()> = Mutex::new(());

/// RAII guard for temporarily setting/removing an environment variable in tests.
///
/// IMPORTANT: This does not prevent other tests from mutating the environment.
/// Pair usage with `ENV_LOCK` when the variable is shared/global (e.g. HOME).
pub struct ScopedEnvVar {
    key: String,
    old: Option<OsString>,
}

impl ScopedEnvVar {
    pub fn set(key: &str, value: impl AsRef<OsStr>) -> Self {
        let old = std::env::var_os(key);
        std::env::set_var(key, value);
        Self {
            key: key.to_string(),
            old,
        }
    }

    pub fn remove(key: &str) -> Self {
        let old = std::env::var_os(key);
        std::env::remove_var(key);
        Self {
            key: key.to_string(),
            old,
        }
    }
}

impl Drop for ScopedEnvVar {
    fn drop(&mut self) {
        match &self.old {
            Some(v) => std::env::set_var(&self.key, v),
            None => std::env::remove_var(&self.key),
        }
    }
}

#[derive(Debug, Default)]
struct Failures {
    home_dir: Option<String>,
    absolute: Option<String>,
    open: Option<String>,
    truncate: Option<String>,
    write: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryFs {
    files: HashMap<PathBuf, String>,
    failures: Failures,
}

fn injected(message: &Option<String>) -> io::Result<()> {
    match message {
        Some(message) => Err(io::Error::new(io::ErrorKind::Other, message.clone())),
        None => Ok(()),
    }
}

/// In-memory file system with failure injection. Clones share the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Rc<RefCell<MemoryFs>>,
}

impl MemoryStorage {
    pub const HOME: &'static str = "/home/tester";
    pub const WORK_DIR: &'static str = "/work";

    pub fn write_file(&self, path: impl AsRef<Path>, contents: &str) {
        self.inner
            .borrow_mut()
            .files
            .insert(path.as_ref().to_path_buf(), contents.to_string());
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.inner.borrow().files.get(path.as_ref()).cloned()
    }

    pub fn fail_home_dir(&self, message: &str) {
        self.inner.borrow_mut().failures.home_dir = Some(message.to_string());
    }

    pub fn fail_absolute(&self, message: &str) {
        self.inner.borrow_mut().failures.absolute = Some(message.to_string());
    }

    pub fn fail_open(&self, message: &str) {
        self.inner.borrow_mut().failures.open = Some(message.to_string());
    }

    pub fn fail_truncate(&self, message: &str) {
        self.inner.borrow_mut().failures.truncate = Some(message.to_string());
    }

    pub fn fail_write(&self, message: &str) {
        self.inner.borrow_mut().failures.write = Some(message.to_string());
    }
}

impl ConfigStorage for MemoryStorage {
    fn home_dir(&self) -> io::Result<PathBuf> {
        injected(&self.inner.borrow().failures.home_dir)?;
        Ok(PathBuf::from(Self::HOME))
    }

    fn absolute(&self, path: &Path) -> io::Result<PathBuf> {
        injected(&self.inner.borrow().failures.absolute)?;
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(Path::new(Self::WORK_DIR).join(path))
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.borrow().files.contains_key(path)
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        let fs = self.inner.borrow();
        injected(&fs.failures.open)?;
        fs.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn ConfigHandle>> {
        let mut fs = self.inner.borrow_mut();
        injected(&fs.failures.open)?;
        fs.files.entry(path.to_path_buf()).or_default();
        Ok(Box::new(MemoryHandle {
            inner: Rc::clone(&self.inner),
            path: path.to_path_buf(),
        }))
    }
}

struct MemoryHandle {
    inner: Rc<RefCell<MemoryFs>>,
    path: PathBuf,
}

impl ConfigHandle for MemoryHandle {
    fn truncate(&mut self) -> io::Result<()> {
        let mut fs = self.inner.borrow_mut();
        injected(&fs.failures.truncate)?;
        fs.files.insert(self.path.clone(), String::new());
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut fs = self.inner.borrow_mut();
        injected(&fs.failures.write)?;
        let text = std::str::from_utf8(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs.files.entry(self.path.clone()).or_default().push_str(text);
        Ok(())
    }
}

/// Registry persisted to `/work/config` inside `storage`.
pub fn memory_config(storage: &MemoryStorage) -> Config {
    Config::load(Box::new(storage.clone()), Some("config")).unwrap()
}

/// Answers requests whose URL path matches a registered route; anything else is a
/// transport failure. Every request is recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Vec<(String, u16, String)>,
    requests: RefCell<Vec<RequestDescriptor>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, path: &str, status: u16, body: &str) -> Self {
        self.routes
            .push((path.to_string(), status, body.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.requests.borrow().clone()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse, TransportError> {
        self.requests.borrow_mut().push(request.clone());
        self.routes
            .iter()
            .find(|(path, _, _)| path == request.url.path())
            .map(|(_, status, body)| HttpResponse {
                status: *status,
                headers: Vec::new(),
                body: body.as_bytes().to_vec(),
            })
            .ok_or_else(|| TransportError("url error".to_string()))
    }
}
