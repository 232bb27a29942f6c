use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Result of decoding a completion that was asked for structured output.
///
/// The completion service is untrusted with respect to structure, so a reply
/// that does not decode is kept verbatim instead of failing the stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "content", rename_all = "snake_case")]
pub enum Parsed<T> {
    /// The reply decoded into the expected shape.
    Parsed(T),
    /// The reply did not decode; `raw` is the completion text.
    Unparsed { raw: String },
}

impl<T> Parsed<T> {
    /// Borrow the decoded value, if any.
    pub fn as_parsed(&self) -> Option<&T> {
        match self {
            Parsed::Parsed(value) => Some(value),
            Parsed::Unparsed { .. } => None,
        }
    }

    /// Whether the reply decoded.
    pub fn is_parsed(&self) -> bool {
        matches!(self, Parsed::Parsed(_))
    }

    /// Transform the decoded value, keeping raw text untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        match self {
            Parsed::Parsed(value) => Parsed::Parsed(f(value)),
            Parsed::Unparsed { raw } => Parsed::Unparsed { raw },
        }
    }
}

impl<T: Serialize> Parsed<T> {
    /// Text form for embedding in a later prompt.
    ///
    /// Decoded values are re-serialized as pretty JSON; raw replies pass through.
    pub fn prompt_text(&self) -> String {
        match self {
            Parsed::Parsed(value) => serde_json::to_string_pretty(value)
                .unwrap_or_else(|e| format!("(unserializable: {})", e)),
            Parsed::Unparsed { raw } => raw.clone(),
        }
    }
}

/// Decode a completion into `T`, degrading to [`Parsed::Unparsed`].
pub fn parse_lenient<T: DeserializeOwned>(completion: &str, context: &str) -> Parsed<T> {
    let json = match extract_json_from_completion(completion) {
        Ok(json) => json,
        Err(e) => {
            debug!(context = %context, error = %e, "No JSON in completion, keeping raw text");
            return Parsed::Unparsed {
                raw: completion.trim().to_string(),
            };
        }
    };

    match serde_json::from_str::<T>(json) {
        Ok(value) => Parsed::Parsed(value),
        Err(e) => {
            warn!(
                context = %context,
                error = %e,
                "Completion JSON did not match the expected shape, keeping raw text"
            );
            Parsed::Unparsed {
                raw: completion.trim().to_string(),
            }
        }
    }
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Attempts extraction in this order:
/// 1. Raw JSON (fast path)
/// 2. ```json ... ``` code blocks
/// 3. ``` ... ``` code blocks
pub fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

/// Serialize a value to JSON for logging, with warning on failure.
pub(crate) fn serialize_for_log<T: Serialize>(value: &T, context: &str) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(
            error = %e,
            context = %context,
            "Failed to serialize value for invocation log"
        );
        serde_json::json!({
            "serialization_error": e.to_string(),
            "context": context
        })
    })
}
