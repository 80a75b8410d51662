//! Error types for xtmask

use crate::exit_codes::{
    EXIT_OTHER_PROBLEM, EXIT_PARAMETER_PROBLEM, EXIT_RESOURCE_PROBLEM, EXIT_VERSION_PROBLEM,
};
use std::fmt;

/// Main error type for xtmask operations
#[derive(Debug)]
pub enum XtError {
    /// Option exists but the active revision cannot encode it
    UnsupportedOption {
        extension: &'static str,
        revision: u8,
        option: &'static str,
        inverted: bool,
    },

    /// Two options of one exclusion group, or the same option twice
    MutualExclusion {
        extension: &'static str,
        option: &'static str,
        conflicting: &'static str,
    },

    /// Numeric operand does not parse or does not fit its width
    OperandOutOfRange {
        extension: &'static str,
        option: &'static str,
        value: String,
        min: u64,
        max: u64,
    },

    /// Rule finished without one of its required options
    MissingRequiredOperation {
        extension: &'static str,
        message: String,
    },

    /// Argument has the wrong syntax for this option
    BadValue {
        extension: &'static str,
        option: &'static str,
        message: String,
    },

    /// `!` in front of an option that has no inverted form
    CannotInvert {
        extension: &'static str,
        option: &'static str,
    },

    /// Option name not in the extension's table
    UnknownOption {
        extension: &'static str,
        option: String,
    },

    /// Option requires an argument but none followed
    MissingArgument {
        extension: &'static str,
        option: &'static str,
    },

    /// No registration for this name and revision
    UnknownExtension { name: String, revision: Option<u8> },

    /// Binary record does not have the size the revision expects
    InvalidRecord {
        extension: &'static str,
        revision: u8,
        expected: usize,
        actual: usize,
    },

    /// Host file (name map, account database) exists but cannot be used
    Resource(String),

    /// IO error
    IoError(std::io::Error),

    /// JSON encoding error
    JsonError(serde_json::Error),

    /// Hex decoding error
    HexError(hex::FromHexError),

    /// Generic error with message
    Generic(String),
}

impl XtError {
    /// Process exit code the command-line frontend reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            XtError::UnsupportedOption { .. }
            | XtError::MutualExclusion { .. }
            | XtError::OperandOutOfRange { .. }
            | XtError::MissingRequiredOperation { .. }
            | XtError::BadValue { .. }
            | XtError::CannotInvert { .. }
            | XtError::UnknownOption { .. }
            | XtError::MissingArgument { .. } => EXIT_PARAMETER_PROBLEM,
            XtError::UnknownExtension { .. } => EXIT_VERSION_PROBLEM,
            XtError::InvalidRecord { .. }
            | XtError::Resource(_)
            | XtError::HexError(_)
            | XtError::IoError(_) => EXIT_RESOURCE_PROBLEM,
            XtError::JsonError(_) | XtError::Generic(_) => EXIT_OTHER_PROBLEM,
        }
    }
}

impl fmt::Display for XtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XtError::UnsupportedOption {
                extension,
                revision,
                option,
                inverted,
            } => write!(
                f,
                "libxt_{extension}.{revision} does not support {}--{option}",
                if *inverted { "! " } else { "" }
            ),
            XtError::MutualExclusion {
                extension,
                option,
                conflicting,
            } if option == conflicting => {
                write!(f, "{extension}: option \"--{option}\" can only be used once.")
            }
            XtError::MutualExclusion {
                extension,
                option,
                conflicting,
            } => write!(
                f,
                "{extension}: option \"--{option}\" cannot be used together with \"--{conflicting}\"."
            ),
            XtError::OperandOutOfRange {
                extension,
                option,
                value,
                min,
                max,
            } => write!(
                f,
                "{extension}: bad value \"{value}\" for option \"--{option}\", or out of range ({min}-{max})."
            ),
            XtError::MissingRequiredOperation { message, .. } => write!(f, "{message}"),
            XtError::BadValue {
                extension, message, ..
            } => write!(f, "{extension}: {message}"),
            XtError::CannotInvert { extension, option } => {
                write!(f, "{extension}: option \"--{option}\" cannot be inverted.")
            }
            XtError::UnknownOption { extension, option } => {
                write!(f, "{extension}: unknown option \"{option}\"")
            }
            XtError::MissingArgument { extension, option } => {
                write!(f, "{extension}: option \"--{option}\" requires an argument")
            }
            XtError::UnknownExtension {
                name,
                revision: Some(revision),
            } => write!(f, "Couldn't load extension `{name}' revision {revision}"),
            XtError::UnknownExtension {
                name,
                revision: None,
            } => write!(f, "Couldn't load extension `{name}'"),
            XtError::InvalidRecord {
                extension,
                revision,
                expected,
                actual,
            } => write!(
                f,
                "{extension}.{revision}: record is {actual} bytes, expected {expected}"
            ),
            XtError::Resource(msg) => write!(f, "{msg}"),
            XtError::IoError(err) => write!(f, "IO error: {err}"),
            XtError::JsonError(err) => write!(f, "JSON error: {err}"),
            XtError::HexError(err) => write!(f, "Hex error: {err}"),
            XtError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for XtError {}

impl From<std::io::Error> for XtError {
    fn from(err: std::io::Error) -> Self {
        XtError::IoError(err)
    }
}

impl From<serde_json::Error> for XtError {
    fn from(err: serde_json::Error) -> Self {
        XtError::JsonError(err)
    }
}

impl From<hex::FromHexError> for XtError {
    fn from(err: hex::FromHexError) -> Self {
        XtError::HexError(err)
    }
}

impl XtError {
    /// Wrap a failed host file load so it reports as a resource problem
    pub fn resource(err: anyhow::Error) -> Self {
        XtError::Resource(format!("{err:#}"))
    }
}

impl From<anyhow::Error> for XtError {
    fn from(err: anyhow::Error) -> Self {
        XtError::Generic(format!("{err:#}"))
    }
}

/// Result type for xtmask operations
pub type Result<T> = std::result::Result<T, XtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_option_message() {
        let err = XtError::UnsupportedOption {
            extension: "MARK",
            revision: 0,
            option: "and-mark",
            inverted: false,
        };
        assert_eq!(err.to_string(), "libxt_MARK.0 does not support --and-mark");
        assert_eq!(err.exit_code(), EXIT_PARAMETER_PROBLEM);

        let err = XtError::UnsupportedOption {
            extension: "socket",
            revision: 2,
            option: "transparent",
            inverted: true,
        };
        assert_eq!(
            err.to_string(),
            "libxt_socket.2 does not support ! --transparent"
        );
    }

    #[test]
    fn test_exclusion_messages() {
        let twice = XtError::MutualExclusion {
            extension: "MARK",
            option: "set-mark",
            conflicting: "set-mark",
        };
        assert_eq!(
            twice.to_string(),
            "MARK: option \"--set-mark\" can only be used once."
        );

        let both = XtError::MutualExclusion {
            extension: "MARK",
            option: "or-mark",
            conflicting: "and-mark",
        };
        assert_eq!(
            both.to_string(),
            "MARK: option \"--or-mark\" cannot be used together with \"--and-mark\"."
        );
    }

    #[test]
    fn test_exit_codes_by_kind() {
        let unknown = XtError::UnknownExtension {
            name: "FOO".into(),
            revision: Some(3),
        };
        assert_eq!(unknown.exit_code(), EXIT_VERSION_PROBLEM);

        let record = XtError::InvalidRecord {
            extension: "MARK",
            revision: 2,
            expected: 8,
            actual: 3,
        };
        assert_eq!(record.exit_code(), EXIT_RESOURCE_PROBLEM);
        assert_eq!(
            record.to_string(),
            "MARK.2: record is 3 bytes, expected 8"
        );
    }

    #[test]
    fn test_host_file_failures_are_resource_problems() {
        let err = XtError::resource(
            anyhow::anyhow!("Permission denied").context("Failed to read /etc/passwd"),
        );
        assert_eq!(err.to_string(), "Failed to read /etc/passwd: Permission denied");
        assert_eq!(err.exit_code(), EXIT_RESOURCE_PROBLEM);
    }
}
