//! Tree configuration.
//!
//! Configuration is loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `BPTREE_DEGREE`: maximum children per internal node (default: `10`, minimum `3`)
//! - `BPTREE_SESSION_MODE`: `buffered` or `immediate` (default: `buffered`)
//!
//! # Invariants
//!
//! - `degree` is always at least [`TreeConfig::MIN_DEGREE`].

use std::str::FromStr;

/// How an operation's writes reach storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Batch writes and commit at the end of the operation.
    #[default]
    Buffered,
    /// Write through on every call.
    Immediate,
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffered" => Ok(Self::Buffered),
            "immediate" => Ok(Self::Immediate),
            other => Err(format!("'{other}' is not a session mode (buffered, immediate)")),
        }
    }
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Shape and write policy of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    degree: usize,
    session_mode: SessionMode,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            degree: Self::DEFAULT_DEGREE,
            session_mode: SessionMode::default(),
        }
    }
}

impl TreeConfig {
    /// Default tree degree.
    pub const DEFAULT_DEGREE: usize = 10;
    /// Smallest degree that still leaves room to split.
    pub const MIN_DEGREE: usize = 3;

    const DEGREE_VAR: &'static str = "BPTREE_DEGREE";
    const SESSION_MODE_VAR: &'static str = "BPTREE_SESSION_MODE";

    /// Configuration with the given degree and buffered sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if `degree` is below [`Self::MIN_DEGREE`].
    pub fn new(degree: usize) -> Result<Self, ConfigError> {
        if degree < Self::MIN_DEGREE {
            return Err(ConfigError::InvalidValue {
                name: Self::DEGREE_VAR.to_string(),
                message: format!("degree {degree} is below the minimum of {}", Self::MIN_DEGREE),
            });
        }
        Ok(Self {
            degree,
            session_mode: SessionMode::Buffered,
        })
    }

    #[must_use]
    pub const fn with_session_mode(mut self, session_mode: SessionMode) -> Self {
        self.session_mode = session_mode;
        self
    }

    #[must_use]
    pub const fn degree(&self) -> usize {
        self.degree
    }

    #[must_use]
    pub const fn session_mode(&self) -> SessionMode {
        self.session_mode
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let degree = match lookup(Self::DEGREE_VAR) {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: Self::DEGREE_VAR.to_string(),
                    message: format!("'{value}' is not a valid degree"),
                })?,
            None => Self::DEFAULT_DEGREE,
        };
        let session_mode = match lookup(Self::SESSION_MODE_VAR) {
            Some(value) => value
                .parse::<SessionMode>()
                .map_err(|message| ConfigError::InvalidValue {
                    name: Self::SESSION_MODE_VAR.to_string(),
                    message,
                })?,
            None => SessionMode::default(),
        };

        Ok(Self::new(degree)?.with_session_mode(session_mode))
    }
}
