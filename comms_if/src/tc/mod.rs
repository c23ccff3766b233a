//! # Telecommand module
//!
//! This module provides telecommand functionality to the communications interface. A telecommand
//! is a flat JSON object carrying the command name and its parameters, for example
//! `{"name": "gecko_gripper_set_delay", "DL": "250"}`.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod gecko;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use serde::{Serialize, Deserialize};
use serde_json::{self, Value, Map};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Key of the command name in the JSON form of a TC.
pub const NAME_KEY: &str = "name";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A telecommand, i.e. an instruction sent to the gripper exec by the ground station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tc {
    /// The name of the command, matched exactly against the dispatch table
    pub name: String,

    /// Parameters of the command. Numeric parameters arrive as strings and are parsed by the
    /// command that uses them.
    pub params: HashMap<String, String>
}

/// Response sent back to the ground after a TC has been executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcResponse {
    #[serde(rename = "Status")]
    pub status: TcStatus,

    #[serde(rename = "Message")]
    pub message: String
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcStatus {
    #[serde(rename = "OK")]
    Ok,

    #[serde(rename = "ERROR")]
    Error
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum TcParseError {
    #[error("TC contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("TC must be a JSON object")]
    NotAnObject,

    #[error("TC has no \"name\" string")]
    MissingName,

    #[error("TC parameter \"{0}\" must be a string or a number")]
    InvalidParam(String)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Tc {
    /// Create a new TC with no parameters.
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            params: HashMap::new()
        }
    }

    /// Add a parameter to the TC, builder style.
    pub fn with_param<V: ToString>(mut self, key: &str, value: V) -> Self {
        self.params.insert(String::from(key), value.to_string());
        self
    }

    /// Get a parameter by key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    /// Parse a new TC from a JSON packet.
    ///
    /// Parameter values may be strings or numbers, numbers are converted to their string form.
    pub fn from_json(json_str: &str) -> Result<Self, TcParseError> {
        // Parse the JSON string into a value
        let val: Value = serde_json::from_str(json_str)
            .map_err(|e| TcParseError::InvalidJson(e))?;

        let obj = match val {
            Value::Object(o) => o,
            _ => return Err(TcParseError::NotAnObject)
        };

        let name = match obj.get(NAME_KEY) {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(TcParseError::MissingName)
        };

        let mut params = HashMap::new();
        for (key, value) in obj.iter().filter(|(k, _)| k.as_str() != NAME_KEY) {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err(TcParseError::InvalidParam(key.clone()))
            };
            params.insert(key.clone(), value);
        }

        Ok(Tc {
            name,
            params
        })
    }

    /// Serialize the TC into its flat JSON form.
    pub fn to_json(&self) -> String {
        let mut obj = Map::new();
        obj.insert(NAME_KEY.into(), Value::String(self.name.clone()));
        for (key, value) in self.params.iter() {
            obj.insert(key.clone(), Value::String(value.clone()));
        }

        Value::Object(obj).to_string()
    }
}

impl TcResponse {
    pub fn ok(message: &str) -> Self {
        Self {
            status: TcStatus::Ok,
            message: String::from(message)
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            status: TcStatus::Error,
            message: String::from(message)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == TcStatus::Ok
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_string_and_number_params() {
        let tc = Tc::from_json(r#"{"name": "gecko_gripper_set_delay", "DL": "250"}"#).unwrap();
        assert_eq!(tc.name, "gecko_gripper_set_delay");
        assert_eq!(tc.param("DL"), Some("250"));

        let tc = Tc::from_json(r#"{"name": "gecko_gripper_set_tol", "TOL": 18.5}"#).unwrap();
        assert_eq!(tc.param("TOL"), Some("18.5"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Tc::from_json("{not json"), Err(TcParseError::InvalidJson(_))));
        assert!(matches!(Tc::from_json("[1, 2]"), Err(TcParseError::NotAnObject)));
        assert!(matches!(Tc::from_json(r#"{"DL": "1"}"#), Err(TcParseError::MissingName)));
        assert!(matches!(
            Tc::from_json(r#"{"name": "x", "IDX": [1]}"#),
            Err(TcParseError::InvalidParam(k)) if k == "IDX"
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let tc = Tc::new("gecko_gripper_open_exp").with_param("IDX", 7);
        assert_eq!(Tc::from_json(&tc.to_json()).unwrap(), tc);
    }

    #[test]
    fn test_response_json() {
        let rsp = TcResponse::error("Unrecognized command");
        assert_eq!(
            serde_json::to_string(&rsp).unwrap(),
            r#"{"Status":"ERROR","Message":"Unrecognized command"}"#
        );
    }
}
