//! Error type shared by the registry, client builder and dispatcher.
//!
//! Every public operation declares its failure points with [`failure_sites!`]. The error
//! number reported to the operator is the 1-based position of the site in that list, so
//! `"batch_create003"` always means the third place `batch_create` can fail.

/// A named place inside one operation where it can fail.
pub trait FailureSite: Copy {
    fn operation(&self) -> &'static str;
    fn errno(&self) -> u32;
}

/// Declare the ordered failure sites of one operation.
///
/// Sites must be listed in the order they can occur at runtime; the errno is derived from
/// the declaration position.
macro_rules! failure_sites {
    ($(#[$meta:meta])* $vis:vis enum $name:ident for $op:literal { $($site:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $($site),+
        }

        impl $crate::error::FailureSite for $name {
            fn operation(&self) -> &'static str {
                $op
            }

            fn errno(&self) -> u32 {
                *self as u32 + 1
            }
        }
    };
}

pub(crate) use failure_sites;

/// Which step of loading or saving the configuration file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStep {
    HomeDir,
    ResolvePath,
    Open,
    Decode,
    Validate,
    Truncate,
    Encode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EmptyData,
    HostNotFound,
    ContextNotFound,
    DuplicateAlias,
    NotFound,
    ReferencedAlias,
    InvalidValue,
    Transport,
    HttpStatus(u16),
    Encoding,
    ConfigFile(ConfigStep),
}

#[derive(Debug, thiserror::Error)]
#[error("{operation}{errno:03} {message}")]
pub struct NgsiError {
    operation: &'static str,
    errno: u32,
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<NgsiError>>,
}

pub type NgsiResult<T> = Result<T, NgsiError>;

impl NgsiError {
    pub fn new(site: impl FailureSite, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation: site.operation(),
            errno: site.errno(),
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Record `site` as the place a collaborator's error surfaced.
    ///
    /// The kind and message of `source` are kept unchanged.
    pub fn wrap(site: impl FailureSite, source: NgsiError) -> Self {
        Self {
            operation: site.operation(),
            errno: site.errno(),
            kind: source.kind,
            message: source.message.clone(),
            source: Some(Box::new(source)),
        }
    }

    /// Like [`NgsiError::wrap`] but with a message describing this level.
    pub fn wrap_with(site: impl FailureSite, message: impl Into<String>, source: NgsiError) -> Self {
        Self {
            operation: site.operation(),
            errno: site.errno(),
            kind: source.kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn errno(&self) -> u32 {
        self.errno
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status attached by the dispatcher, if the failure was a status error.
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            ErrorKind::HttpStatus(status) => Some(status),
            _ => None,
        }
    }

    pub fn cause(&self) -> Option<&NgsiError> {
        self.source.as_deref()
    }

    /// The error at the point of origin.
    pub fn root(&self) -> &NgsiError {
        let mut current = self;
        while let Some(next) = current.cause() {
            current = next;
        }
        current
    }

    /// One line per level, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut lines = vec![self.to_string()];
        let mut current = self.cause();
        while let Some(err) = current {
            lines.push(err.to_string());
            current = err.cause();
        }
        lines
    }
}
