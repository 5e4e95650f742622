//! Request schemas for the replay endpoints.

use crate::models::{ReplayData, ReplayId, UserId};
use crate::validation::{FieldSpec, Issue, RequestSchema, Schema};
use serde::Deserialize;
use serde_json::Value;

/// POST /replay body
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReplayBody {
    /// The replay data
    pub data: ReplayData,

    /// The user's unique identifier
    #[serde(rename = "userId")]
    pub user_id: UserId,
}

impl RequestSchema for CreateReplayBody {
    fn schema() -> Schema {
        Schema::new()
            .field(FieldSpec::object("data").refine(non_empty_object))
            .field(FieldSpec::number("userId").integer().nonnegative())
    }
}

/// GET /replay body
#[derive(Debug, Clone, Deserialize)]
pub struct GetReplayBody {
    /// The replay _id
    #[serde(rename = "_id")]
    pub id: ReplayId,
}

impl RequestSchema for GetReplayBody {
    fn schema() -> Schema {
        Schema::new().field(FieldSpec::string("_id").transform(replay_id))
    }
}

/// An empty payload is reported as if it were missing.
fn non_empty_object(value: &Value) -> Option<Issue> {
    match value {
        Value::Object(map) if map.is_empty() => Some(Issue::required("object")),
        _ => None,
    }
}

/// Normalize a hex identifier; malformed ids surface as a type mismatch.
fn replay_id(value: Value) -> Result<Value, Issue> {
    let invalid = || Issue::invalid_type("string", "unknown");
    let raw = value.as_str().ok_or_else(invalid)?;
    let id: ReplayId = raw.parse().map_err(|_| invalid())?;
    Ok(Value::String(id.to_string()))
}
