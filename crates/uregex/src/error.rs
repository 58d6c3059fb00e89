use std::fmt;

use uregex_contracts::{ForeignError, UErrorCode};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No pattern has been set, or the session is closed.
    PatternNotSet,
    TextNotSet,
    InvalidRegex { status: UErrorCode, offset: u32 },
    /// Foreign memory was not readable or writable where the call layout expects it.
    Marshal { what: String },
    Trap { function: &'static str, message: String },
    Engine { function: &'static str, status: UErrorCode },
    OutOfMemory { bytes: u32 },
    Unavailable(ForeignError),
    MissingExport(&'static str),
    StaleView,
    OutOfRange { start: u32, end: u32, len: u32 },
    InvalidUtf16,
}

impl Error {
    /// Whether the context that produced this error can no longer be trusted.
    pub fn poisons_context(&self) -> bool {
        matches!(self, Error::Marshal { .. } | Error::Trap { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PatternNotSet => f.write_str("pattern not set"),
            Error::TextNotSet => f.write_str("text not set"),
            Error::InvalidRegex { status, offset } => {
                write!(f, "invalid regex: {status} at offset {offset}")
            }
            Error::Marshal { what } => write!(f, "marshal failure: {what}"),
            Error::Trap { function, message } => write!(f, "{function} trapped: {message}"),
            Error::Engine { function, status } => write!(f, "{function} failed: {status}"),
            Error::OutOfMemory { bytes } => {
                write!(f, "foreign allocation of {bytes} bytes failed")
            }
            Error::Unavailable(err) => write!(f, "engine unavailable: {err}"),
            Error::MissingExport(name) => write!(f, "program does not export {name:?}"),
            Error::StaleView => f.write_str("buffer view outlived its allocation"),
            Error::OutOfRange { start, end, len } => {
                write!(f, "range {start}..{end} out of bounds for length {len}")
            }
            Error::InvalidUtf16 => f.write_str("engine returned ill-formed UTF-16"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Unavailable(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ForeignError> for Error {
    fn from(err: ForeignError) -> Self {
        Error::Unavailable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_stable() {
        assert_eq!(Error::PatternNotSet.to_string(), "pattern not set");
        let err = Error::InvalidRegex {
            status: UErrorCode::REGEX_MISMATCHED_PAREN,
            offset: 3,
        };
        assert_eq!(
            err.to_string(),
            "invalid regex: U_REGEX_MISMATCHED_PAREN (66310) at offset 3"
        );
    }

    #[test]
    fn only_memory_faults_poison() {
        assert!(Error::Trap {
            function: "uregex_find",
            message: "unreachable".into()
        }
        .poisons_context());
        assert!(Error::Marshal {
            what: "status".into()
        }
        .poisons_context());
        assert!(!Error::TextNotSet.poisons_context());
        assert!(!Error::OutOfMemory { bytes: 8 }.poisons_context());
    }
}
