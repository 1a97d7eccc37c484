//! OSC-style message type definitions
//!
//! A message is an address plus an ordered list of type-tagged arguments.
//! The wire encoding is deliberately absent: these values only travel
//! in-process to the device link and to bus subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::TransportError;

/// A single type-tagged argument
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    /// Numeric value (parameter values are always numeric)
    Number(f64),
    /// Text value
    Text(String),
    /// Boolean value
    Bool(bool),
}

impl ArgValue {
    /// Type tag character, as OSC type-tag strings would spell it
    pub fn type_tag(&self) -> char {
        match self {
            ArgValue::Number(_) => 'f',
            ArgValue::Text(_) => 's',
            ArgValue::Bool(true) => 'T',
            ArgValue::Bool(false) => 'F',
        }
    }

    /// Extract numeric value if available
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::Number(n) => write!(f, "{}", n),
            ArgValue::Text(s) => write!(f, "{:?}", s),
            ArgValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Number(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Text(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Text(value)
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

/// One protocol unit: address, ordered arguments, optional send time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    address: String,
    args: Vec<ArgValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Build a message, rejecting an empty address
    pub fn new(address: impl Into<String>, args: Vec<ArgValue>) -> Result<Self, TransportError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(TransportError::InvalidMessage {
                reason: "address must not be empty".to_string(),
            });
        }
        Ok(Self {
            address,
            args,
            timestamp: None,
        })
    }

    /// Message carrying a single numeric value (the shape parameter syncs use)
    pub fn value(address: impl Into<String>, value: f64) -> Result<Self, TransportError> {
        Self::new(address, vec![ArgValue::Number(value)])
    }

    /// Copy of this message stamped with a send time
    pub fn stamped(&self, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(at),
            ..self.clone()
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn args(&self) -> &[ArgValue] {
        &self.args
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Type-tag string in OSC notation (",f", ",sT", ...)
    pub fn type_tags(&self) -> String {
        std::iter::once(',')
            .chain(self.args.iter().map(ArgValue::type_tag))
            .collect()
    }

    /// Arguments joined for log output
    pub fn args_display(&self) -> String {
        if self.args.is_empty() {
            return "(no args)".to_string();
        }
        self.args
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
