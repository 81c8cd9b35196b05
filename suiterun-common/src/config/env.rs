//! Environment variable parsing with type safety.
//!
//! The parser collects every problem it finds instead of stopping at the
//! first one, so a misconfigured CI job reports all bad variables at once.

use super::source::Sourced;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Required variable {var} is not set")]
    Missing { var: String },
}

enum VarSource {
    Process,
    Fixed(HashMap<String, String>),
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    vars: VarSource,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser over the process environment.
    pub fn new() -> Self {
        Self {
            vars: VarSource::Process,
            errors: Vec::new(),
        }
    }

    /// Parser over a fixed variable set instead of the process environment.
    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: VarSource::Fixed(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match &self.vars {
            VarSource::Process => env::var(name).ok(),
            VarSource::Fixed(map) => map.get(name).cloned(),
        }
    }

    /// Get a string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match self.lookup(name) {
            Some(value) if !value.is_empty() => Sourced::from_env(value, name),
            _ => Sourced::default_value(default.to_string()),
        }
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        match self.lookup(name) {
            Some(value) if value.is_empty() => Sourced::from_env(None, name),
            Some(value) => Sourced::from_env(Some(value), name),
            None => Sourced::default_value(None),
        }
    }

    /// Get a string that must be set and non-empty.
    pub fn get_required_string(&mut self, name: &str) -> Sourced<String> {
        match self.lookup(name) {
            Some(value) if !value.is_empty() => Sourced::from_env(value, name),
            _ => {
                self.errors.push(EnvError::Missing {
                    var: name.to_string(),
                });
                Sourced::default_value(String::new())
            }
        }
    }

    /// True when the variable is set to anything non-empty.
    ///
    /// CI systems export `CI=True`, `CI=true` or `CI=1`; all count.
    pub fn is_set(&mut self, name: &str) -> Sourced<bool> {
        match self.lookup(name) {
            Some(value) => Sourced::from_env(!value.is_empty(), name),
            None => Sourced::default_value(false),
        }
    }

    /// Get a usize value with default and range validation.
    pub fn get_usize_range(
        &mut self,
        name: &str,
        default: usize,
        min: usize,
        max: usize,
    ) -> Sourced<usize> {
        match self.lookup(name) {
            Some(value) if value.trim().is_empty() => Sourced::default_value(default),
            Some(value) => match value.trim().parse::<usize>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(n, name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: name.to_string(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::default_value(default)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: name.to_string(),
                        expected: "unsigned integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            None => Sourced::default_value(default),
        }
    }

    /// Get a duration in humantime notation ("10s", "10m", "1h 30m").
    ///
    /// A bare number is read as seconds.
    pub fn get_duration(&mut self, name: &str, default: Duration) -> Sourced<Duration> {
        match self.lookup(name) {
            Some(value) if value.trim().is_empty() => Sourced::default_value(default),
            Some(value) => match parse_duration(&value) {
                Some(d) if !d.is_zero() => Sourced::from_env(d, name),
                _ => {
                    self.errors.push(EnvError::InvalidDuration {
                        var: name.to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            None => Sourced::default_value(default),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).ok()
}
