//! Schema-driven request validation.
//!
//! A [`Schema`] is an ordered list of [`FieldSpec`]s. [`validate`] walks the
//! schema against a raw JSON body and returns either the normalized body or
//! every issue found, in schema order. The [`Validated`] extractor wires this
//! into axum: it runs after the auth gate and before the handler.

use crate::envelope::{Envelope, NoFail};
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Root path segment for body fields
pub const BODY_PATH: &str = "body";

// ============================================================================
// Issues
// ============================================================================

/// Machine-readable issue code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    InvalidType,
    TooSmall,
}

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub code: IssueCode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inclusive: Option<bool>,

    pub path: Vec<String>,

    pub message: String,
}

impl Issue {
    /// Type mismatch between the expected kind and what was received
    pub fn invalid_type(expected: &str, received: &str) -> Self {
        let message = if received == "undefined" {
            "Required".to_string()
        } else {
            format!("Expected {expected}, received {received}")
        };
        Self {
            code: IssueCode::InvalidType,
            expected: Some(expected.to_string()),
            received: Some(received.to_string()),
            minimum: None,
            inclusive: None,
            path: Vec::new(),
            message,
        }
    }

    /// Missing required value
    pub fn required(expected: &str) -> Self {
        Self::invalid_type(expected, "undefined")
    }

    /// Number below an inclusive minimum
    pub fn too_small(minimum: f64) -> Self {
        Self {
            code: IssueCode::TooSmall,
            expected: None,
            received: None,
            minimum: Some(minimum),
            inclusive: Some(true),
            path: Vec::new(),
            message: format!("Number must be greater than or equal to {minimum}"),
        }
    }

    /// Attach a path, replacing any existing one
    #[must_use]
    pub fn at(mut self, path: &[&str]) -> Self {
        self.path = path.iter().map(|s| (*s).to_string()).collect();
        self
    }
}

/// Issues reported when the body is not parseable JSON at all
pub fn syntax_error_issues() -> Vec<Issue> {
    vec![Issue::invalid_type("object", "unknown").at(&[BODY_PATH])]
}

/// Name of a JSON value's type as reported in issues
pub fn received_type(value: Option<&Value>) -> &'static str {
    match value {
        None => "undefined",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

// ============================================================================
// Field Specs
// ============================================================================

/// Expected JSON kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Object,
    Number,
    String,
}

impl FieldKind {
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Object => "object",
            FieldKind::Number => "number",
            FieldKind::String => "string",
        }
    }

    fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldKind::Object, Value::Object(_))
                | (FieldKind::Number, Value::Number(_))
                | (FieldKind::String, Value::String(_))
        )
    }
}

/// Built-in numeric constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Whole number; integral floats are normalized to integers
    Integer,
    /// Greater than or equal to zero
    NonNegative,
}

/// Custom predicate; returns the issue to report on failure
pub type Refinement = fn(&Value) -> Option<Issue>;

/// Pure conversion to the normalized value
pub type Transform = fn(Value) -> Result<Value, Issue>;

/// Declarative description of one required body field
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub checks: Vec<Check>,
    pub refinement: Option<Refinement>,
    pub transform: Option<Transform>,
}

impl FieldSpec {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            checks: Vec::new(),
            refinement: None,
            transform: None,
        }
    }

    pub fn object(name: &'static str) -> Self {
        Self::new(name, FieldKind::Object)
    }

    pub fn number(name: &'static str) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, FieldKind::String)
    }

    #[must_use]
    pub fn integer(mut self) -> Self {
        self.checks.push(Check::Integer);
        self
    }

    #[must_use]
    pub fn nonnegative(mut self) -> Self {
        self.checks.push(Check::NonNegative);
        self
    }

    #[must_use]
    pub fn refine(mut self, refinement: Refinement) -> Self {
        self.refinement = Some(refinement);
        self
    }

    #[must_use]
    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Validate a single (possibly absent) value against this spec
    fn apply(&self, value: Option<&Value>, issues: &mut Vec<Issue>) -> Option<Value> {
        let path = [BODY_PATH, self.name];

        let Some(value) = value else {
            issues.push(Issue::required(self.kind.name()).at(&path));
            return None;
        };

        if !self.kind.matches(value) {
            issues.push(Issue::invalid_type(self.kind.name(), received_type(Some(value))).at(&path));
            return None;
        }

        let mut value = value.clone();
        let before = issues.len();
        for check in &self.checks {
            if let Err(issue) = apply_check(*check, &mut value) {
                issues.push(issue.at(&path));
            }
        }
        if issues.len() > before {
            return None;
        }

        if let Some(refinement) = self.refinement {
            if let Some(issue) = refinement(&value) {
                issues.push(issue.at(&path));
                return None;
            }
        }

        match self.transform {
            Some(transform) => match transform(value) {
                Ok(normalized) => Some(normalized),
                Err(issue) => {
                    issues.push(issue.at(&path));
                    None
                }
            },
            None => Some(value),
        }
    }
}

fn apply_check(check: Check, value: &mut Value) -> Result<(), Issue> {
    let number = match value {
        Value::Number(number) => number.clone(),
        _ => return Ok(()),
    };

    match check {
        Check::Integer => {
            if number.is_i64() || number.is_u64() {
                return Ok(());
            }
            match number.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 => match integral_value(f) {
                    Some(integral) => {
                        *value = integral;
                        Ok(())
                    }
                    None => Err(Issue::invalid_type("integer", "float")),
                },
                _ => Err(Issue::invalid_type("integer", "float")),
            }
        }
        Check::NonNegative => {
            if number.as_f64().is_some_and(|f| f < 0.0) {
                Err(Issue::too_small(0.0))
            } else {
                Ok(())
            }
        }
    }
}

/// 2^64, the first integral float past `u64::MAX`
const U64_BOUND: f64 = 18_446_744_073_709_551_616.0;
/// -2^63, which is `i64::MIN` exactly
const I64_FLOOR: f64 = -9_223_372_036_854_775_808.0;

/// Integer value of an integral float, or `None` when no integer type holds it
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn integral_value(f: f64) -> Option<Value> {
    if (0.0..U64_BOUND).contains(&f) {
        Some(Value::from(f as u64))
    } else if (I64_FLOOR..0.0).contains(&f) {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

// ============================================================================
// Schemas
// ============================================================================

/// Ordered set of body fields
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

/// Validate a raw body against a schema.
///
/// Returns the normalized body containing only the declared fields, or the
/// issues in schema order.
pub fn validate(schema: &Schema, raw: &Value) -> Result<Map<String, Value>, Vec<Issue>> {
    let Value::Object(body) = raw else {
        return Err(vec![
            Issue::invalid_type("object", received_type(Some(raw))).at(&[BODY_PATH])
        ]);
    };

    let mut issues = Vec::new();
    let mut normalized = Map::new();

    for field in &schema.fields {
        if let Some(value) = field.apply(body.get(field.name), &mut issues) {
            normalized.insert(field.name.to_string(), value);
        }
    }

    if issues.is_empty() {
        Ok(normalized)
    } else {
        Err(issues)
    }
}

/// Typed request body with an attached schema
pub trait RequestSchema: DeserializeOwned {
    fn schema() -> Schema;
}

// ============================================================================
// Extractor
// ============================================================================

/// Extractor yielding a validated, normalized, typed body.
///
/// An empty body is treated as `{}`. Unparseable JSON and schema failures
/// reject with an Invalid envelope.
#[derive(Debug, Clone)]
pub struct Validated<T>(pub T);

/// Parse raw bytes and validate them into `T`
pub fn parse_body<T: RequestSchema>(bytes: &[u8]) -> Result<T, Vec<Issue>> {
    let raw: Value = if bytes.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(bytes).map_err(|_| syntax_error_issues())?
    };
    // Only objects and arrays are accepted as JSON bodies
    if !(raw.is_object() || raw.is_array()) {
        return Err(syntax_error_issues());
    }

    let normalized = validate(&T::schema(), &raw)?;

    serde_json::from_value(Value::Object(normalized)).map_err(|e| {
        vec![Issue {
            message: e.to_string(),
            ..Issue::invalid_type("object", "unknown").at(&[BODY_PATH])
        }]
    })
}

#[async_trait]
impl<S, T> FromRequest<S> for Validated<T>
where
    S: Send + Sync,
    T: RequestSchema,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;

        match parse_body::<T>(&bytes) {
            Ok(body) => Ok(Validated(body)),
            Err(issues) => {
                debug!(issue_count = issues.len(), "Request body rejected");
                Err(Envelope::<(), NoFail>::Invalid(issues).into_response())
            }
        }
    }
}
