//! Wire frames: newline-delimited JSON requests and responses.
//!
//! Requests: `{version, method, params, id}`. Responses carry either a
//! `result` object or an `error` object; progress frames share the
//! request's correlation id and are marked by `status: "progress"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use anvil_types::CoreError;

/// Protocol versions this build accepts.
pub const SUPPORTED_VERSIONS: &[&str] = &["1", "1.0"];

/// One parsed request line.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestFrame {
    #[serde(default = "default_version")]
    pub version: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Error body on the wire: stable code, human message, structured data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub data: Value,
}

impl ErrorBody {
    pub fn from_core(error: &CoreError) -> Self {
        let mut data = serde_json::to_value(error).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut data {
            map.remove("code");
            map.insert("recoverable".to_string(), Value::Bool(error.recoverable()));
        }
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            data,
        }
    }
}

/// One response line.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseFrame {
    Result {
        id: Value,
        result: Value,
    },
    Error {
        id: Value,
        error: ErrorBody,
    },
    Progress {
        id: Value,
        status: &'static str,
        percent: f32,
        stage: String,
    },
}

impl ResponseFrame {
    pub fn result(id: Value, result: Value) -> Self {
        ResponseFrame::Result { id, result }
    }

    pub fn error(id: Value, error: &CoreError) -> Self {
        ResponseFrame::Error {
            id,
            error: ErrorBody::from_core(error),
        }
    }

    pub fn progress(id: Value, stage: &str, percent: f32) -> Self {
        ResponseFrame::Progress {
            id,
            status: "progress",
            percent,
            stage: stage.to_string(),
        }
    }

    /// Serialize to exactly one line.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"id":null,"error":{"code":"GeometryEngineError","message":"response serialization failed","data":null}}"#.to_string()
        })
    }
}

/// Deserialize params into a typed struct, mapping serde failures onto the
/// wire parameter errors.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, CoreError> {
    serde_json::from_value(params.clone()).map_err(|e| {
        let text = e.to_string();
        if let Some(rest) = text.strip_prefix("missing field `") {
            if let Some(field) = rest.split('`').next() {
                return CoreError::MissingParameter {
                    field: field.to_string(),
                };
            }
        }
        CoreError::InvalidParameter {
            field: "params".to_string(),
            provided_value: params.to_string(),
            accepted_range: text,
            suggestion: None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_with_defaults() {
        let frame: RequestFrame =
            serde_json::from_str(r#"{"method":"entity.list","id":7}"#).unwrap();
        assert_eq!(frame.version, "1.0");
        assert_eq!(frame.method, "entity.list");
        assert_eq!(frame.id, serde_json::json!(7));
    }

    #[test]
    fn progress_frame_shape() {
        let frame = ResponseFrame::progress(serde_json::json!(3), "intersecting_faces", 42.0);
        let line = frame.to_line();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["status"], "progress");
        assert_eq!(value["stage"], "intersecting_faces");
    }

    #[test]
    fn error_frame_carries_recoverable_flag() {
        let err = CoreError::MissingParameter {
            field: "radius".into(),
        };
        let line = ResponseFrame::error(serde_json::json!(1), &err).to_line();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["error"]["code"], "MissingParameter");
        assert_eq!(value["error"]["data"]["recoverable"], true);
    }

    #[test]
    fn missing_field_maps_to_missing_parameter() {
        #[derive(serde::Deserialize, Debug)]
        struct P {
            #[allow(dead_code)]
            radius: f64,
        }
        let err = parse_params::<P>(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, CoreError::MissingParameter { field } if field == "radius"));
    }
}
