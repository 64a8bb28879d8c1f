use std::fmt;

/// Broad failure classes. Nothing in the pipeline recovers from any of them;
/// the kind only decides the message tone and the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required input is missing or unusable (debug image, config, release suffix).
    Precondition,
    /// An external program failed, or a copy/mirror step hit an I/O error.
    Process,
    /// No configuration profile matches the kernel.
    NoMatch,
    /// Malformed tool config or boundary descriptor.
    Config,
    /// A pipeline stage was invoked out of order.
    Sequence,
    Other,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Other => 1,
            ErrorKind::Precondition => 2,
            ErrorKind::Process => 3,
            ErrorKind::NoMatch => 4,
            ErrorKind::Config => 5,
            ErrorKind::Sequence => 6,
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Other, msg)
    }

    pub fn precondition<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Precondition, msg)
    }

    pub fn process<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Process, msg)
    }

    pub fn no_match<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::NoMatch, msg)
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn sequence<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Sequence, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Prefix the message with context while keeping the kind.
    pub fn context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            msg: format!("{ctx}: {}", self.msg),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::process(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
