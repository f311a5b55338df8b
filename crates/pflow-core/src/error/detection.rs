//! API-warning detection over node outputs.
//!
//! Many tool calls succeed at the transport layer while failing semantically:
//! an HTTP 200 wrapping `"ok": false`, a GraphQL payload with a populated
//! `errors` array, or a JSON body whose text says `channel_not_found`. The
//! instrumented wrapper runs [`scan_output`] over every `exec` result and
//! converts such shapes into structured [`EngineError`]s before they can
//! propagate downstream as ordinary data.
//!
//! Classification follows the taxonomy:
//! - HTTP 401/403/404 or a resource-vocabulary match → `resource_error`
//!   (non-repairable, caller-level concern);
//! - HTTP 429 → `api_warning`, repairable (backoff);
//! - validation-vocabulary match, `"ok": false`, or GraphQL `errors` →
//!   `api_warning`; validation matches stay fixable (parameters can be
//!   mutated), the others do not.

use serde_json::Value;

use super::{EngineError, ErrorCategory};

/// HTTP status codes that indicate a semantically-failed call.
const WARNING_STATUS_CODES: [u16; 4] = [401, 403, 404, 429];

/// Phrases that indicate the upstream rejected the request parameters.
/// Matched case-insensitively against the serialized output body.
pub const VALIDATION_ERROR_PHRASES: &[&str] = &[
    "validation failed",
    "validation error",
    "invalid parameter",
    "invalid parameters",
    "invalid argument",
    "invalid arguments",
    "invalid input",
    "invalid request",
    "invalid value",
    "invalid format",
    "invalid type",
    "invalid field",
    "invalid payload",
    "invalid body",
    "invalid query",
    "invalid syntax",
    "invalid json",
    "invalid date",
    "invalid email",
    "invalid url",
    "invalid id",
    "invalid token format",
    "invalid enum",
    "invalid option",
    "invalid choice",
    "invalid range",
    "invalid length",
    "malformed request",
    "malformed input",
    "malformed json",
    "missing required",
    "missing parameter",
    "missing field",
    "missing argument",
    "missing value",
    "missing property",
    "field is required",
    "parameter is required",
    "is a required field",
    "required field missing",
    "required parameter missing",
    "must be provided",
    "must not be empty",
    "must not be null",
    "must be one of",
    "must be a string",
    "must be a number",
    "must be an integer",
    "must be a boolean",
    "must be an array",
    "must be an object",
    "must be positive",
    "must be greater than",
    "must be less than",
    "must match pattern",
    "cannot be blank",
    "cannot be empty",
    "cannot be null",
    "cannot be negative",
    "too long",
    "too short",
    "out of range",
    "exceeds maximum",
    "below minimum",
    "unexpected field",
    "unexpected parameter",
    "unknown parameter",
    "unknown field",
    "unknown property",
    "unsupported value",
    "unsupported type",
    "unprocessable entity",
    "schema validation",
    "does not match schema",
    "failed to parse",
    "type mismatch",
    "wrong type",
    "bad request",
];

/// Phrases that indicate a missing or inaccessible upstream resource.
pub const RESOURCE_NOT_FOUND_PHRASES: &[&str] = &[
    "not found",
    "not_found",
    "does not exist",
    "no such file",
    "no such resource",
    "no such user",
    "no such channel",
    "channel_not_found",
    "user_not_found",
    "resource_not_found",
    "page not found",
    "object not found",
    "record not found",
    "entity not found",
    "has been deleted",
    "no longer exists",
    "no longer available",
    "resource gone",
    "access denied",
    "permission denied",
    "unauthorized",
    "forbidden",
];

/// Scan a node's exec output for semantically-failed API calls.
///
/// Returns `None` when the output looks healthy. The scan is bounded: only
/// the first 64 KiB of the serialized output participates in phrase matching,
/// so pathological payloads cannot stall the wrapper.
pub fn scan_output(output: &Value) -> Option<EngineError> {
    if let Some(status) = find_status_code(output) {
        if WARNING_STATUS_CODES.contains(&status) {
            return Some(error_for_status(status, output));
        }
    }

    if let Some(err) = detect_ok_false(output) {
        return Some(err);
    }
    if let Some(err) = detect_graphql_errors(output) {
        return Some(err);
    }

    let body = bounded_body_text(output);
    if let Some(phrase) = match_phrase(&body, RESOURCE_NOT_FOUND_PHRASES) {
        return Some(
            EngineError::resource(format!("upstream reports missing resource ({})", phrase))
                .with_raw_response(output.clone())
                .with_fixable(false),
        );
    }
    if let Some(phrase) = match_phrase(&body, VALIDATION_ERROR_PHRASES) {
        return Some(
            EngineError::api_warning(format!("upstream rejected the request ({})", phrase))
                .with_raw_response(output.clone())
                .with_fixable(true),
        );
    }

    None
}

fn error_for_status(status: u16, output: &Value) -> EngineError {
    match status {
        429 => EngineError::api_warning("upstream rate limit (HTTP 429)")
            .with_status(429)
            .with_raw_response(output.clone())
            .with_fixable(true),
        code => EngineError::resource(format!("upstream returned HTTP {}", code))
            .with_status(code)
            .with_raw_response(output.clone())
            .with_fixable(false),
    }
}

/// Locate a plausible HTTP status on the output. Checks the conventional
/// field names at the top level and one level down (common `response` /
/// `result` nesting).
fn find_status_code(output: &Value) -> Option<u16> {
    fn status_of(obj: &Value) -> Option<u16> {
        let map = obj.as_object()?;
        for key in ["status_code", "statusCode", "status", "code"] {
            if let Some(n) = map.get(key).and_then(Value::as_u64) {
                if (100..600).contains(&n) {
                    return u16::try_from(n).ok();
                }
            }
        }
        None
    }

    if let Some(code) = status_of(output) {
        return Some(code);
    }
    if let Some(map) = output.as_object() {
        for key in ["response", "result", "error"] {
            if let Some(code) = map.get(key).and_then(status_of) {
                return Some(code);
            }
        }
    }
    None
}

/// Slack-style envelope: `{"ok": false, "error": "..."}`.
fn detect_ok_false(output: &Value) -> Option<EngineError> {
    let map = output.as_object()?;
    if map.get("ok")? == &Value::Bool(false) {
        let detail = map
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("no error detail");
        let body = detail.to_ascii_lowercase();
        if match_phrase(&body, RESOURCE_NOT_FOUND_PHRASES).is_some() {
            return Some(
                EngineError::resource(format!("upstream reports missing resource ({})", detail))
                    .with_raw_response(output.clone())
                    .with_fixable(false),
            );
        }
        return Some(
            EngineError::api_warning(format!("upstream reports ok=false ({})", detail))
                .with_raw_response(output.clone())
                .with_fixable(false),
        );
    }
    None
}

/// GraphQL envelope: a populated top-level `errors` array.
fn detect_graphql_errors(output: &Value) -> Option<EngineError> {
    let errors = output.as_object()?.get("errors")?.as_array()?;
    if errors.is_empty() {
        return None;
    }
    let first = errors[0]
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unstructured GraphQL error");
    Some(
        EngineError::api_warning(format!(
            "GraphQL response carries {} error(s): {}",
            errors.len(),
            first
        ))
        .with_raw_response(output.clone())
        .with_details(Value::Array(errors.clone()))
        .with_fixable(false),
    )
}

fn bounded_body_text(output: &Value) -> String {
    const MAX_SCAN_BYTES: usize = 64 * 1024;
    let mut text = output.to_string();
    if text.len() > MAX_SCAN_BYTES {
        let mut cut = MAX_SCAN_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text.make_ascii_lowercase();
    text
}

fn match_phrase<'a>(body: &str, phrases: &'a [&'a str]) -> Option<&'a str> {
    phrases.iter().copied().find(|p| body.contains(p))
}

/// Categorize an arbitrary node failure message when no structured scan
/// matched. Used by the instrumented wrapper as the fallback classifier.
pub fn categorize_message(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        ErrorCategory::TimeoutError
    } else if match_phrase(&lower, RESOURCE_NOT_FOUND_PHRASES).is_some() {
        ErrorCategory::ResourceError
    } else {
        ErrorCategory::RuntimeError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn http_404_is_resource_error() {
        let out = json!({"status_code": 404, "body": "gone"});
        let err = scan_output(&out).unwrap();
        assert_eq!(err.category, ErrorCategory::ResourceError);
        assert_eq!(err.status_code, Some(404));
        assert!(!err.fixable);
    }

    #[test]
    fn http_429_is_repairable_api_warning() {
        let out = json!({"response": {"status": 429}});
        let err = scan_output(&out).unwrap();
        assert_eq!(err.category, ErrorCategory::ApiWarning);
        assert!(err.fixable);
    }

    #[test]
    fn slack_ok_false_with_missing_channel_is_resource_error() {
        let out = json!({"ok": false, "error": "channel_not_found"});
        let err = scan_output(&out).unwrap();
        assert_eq!(err.category, ErrorCategory::ResourceError);
    }

    #[test]
    fn graphql_errors_are_api_warnings() {
        let out = json!({"data": null, "errors": [{"message": "Field 'foo' missing"}]});
        let err = scan_output(&out).unwrap();
        assert_eq!(err.category, ErrorCategory::ApiWarning);
        assert!(err.error_details.is_some());
    }

    #[test]
    fn validation_phrase_in_body_is_fixable_warning() {
        let out = json!({"message": "Invalid parameter: 'channl' is not recognized"});
        let err = scan_output(&out).unwrap();
        assert_eq!(err.category, ErrorCategory::ApiWarning);
        assert!(err.fixable);
    }

    #[test]
    fn healthy_output_passes() {
        let out = json!({"ok": true, "items": [1, 2, 3], "status": 200});
        assert!(scan_output(&out).is_none());
    }

    #[test]
    fn empty_graphql_errors_array_passes() {
        let out = json!({"data": {"x": 1}, "errors": []});
        assert!(scan_output(&out).is_none());
    }

    #[test]
    fn message_fallback_categorization() {
        assert_eq!(categorize_message("request timed out"), ErrorCategory::TimeoutError);
        assert_eq!(categorize_message("user not found"), ErrorCategory::ResourceError);
        assert_eq!(categorize_message("boom"), ErrorCategory::RuntimeError);
    }

    #[test]
    fn source_is_node_for_detected_warnings() {
        let out = json!({"status": 401});
        let err = scan_output(&out).unwrap();
        assert_eq!(err.origin, super::super::ErrorSource::Node);
    }
}
