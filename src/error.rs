use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    InvalidArgs(String),
    Affinity { cpu: usize, source: io::Error },
    Priority { priority: i32, source: io::Error },
    Spawn { cpu: usize, source: io::Error },
    Internal(String),
    Interrupted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::InvalidArgs(msg) => write!(f, "invalid arguments: {}", msg),
            Error::Affinity { cpu, source } => {
                write!(f, "failed to pin thread to cpu {}: {}", cpu, source)
            }
            Error::Priority { priority, source } => write!(
                f,
                "failed to set SCHED_FIFO priority {}: {}",
                priority, source
            ),
            Error::Spawn { cpu, source } => {
                write!(f, "failed to spawn worker for cpu {}: {}", cpu, source)
            }
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
            Error::Interrupted => write!(f, "interrupted before the timed run"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Affinity { source, .. }
            | Error::Priority { source, .. }
            | Error::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
