//! Reduces agent responses to a canonical `{success, tools_used, payload}`.
//!
//! Agents wrap tool results in provider-specific envelopes. Each extractor in
//! the chain peels one envelope; a deeper layer that reports `success`
//! overrides the layers above it, since an agent can finish its turn
//! successfully while the tool it called failed.

use serde_json::Value;

use crate::domain::models::{AgentResponse, NormalizedResponse};

/// One step of the normalization chain.
pub trait ResponseExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Refine `current` using whatever this extractor recognises in `raw`.
    fn extract(&self, raw: &AgentResponse, current: &mut NormalizedResponse);
}

/// Fields the agent runtime reports directly.
pub struct TopLevelExtractor;

impl ResponseExtractor for TopLevelExtractor {
    fn name(&self) -> &'static str {
        "top_level"
    }

    fn extract(&self, raw: &AgentResponse, current: &mut NormalizedResponse) {
        current.success = raw.success;
        current.tools_used.clone_from(&raw.tools_used);
        current.payload = raw.result.clone();
        if !raw.response.is_empty() {
            current.message = Some(raw.response.clone());
        }
    }
}

/// `result.success`, as returned by runtimes that wrap a single tool call.
pub struct ResultEnvelopeExtractor;

impl ResponseExtractor for ResultEnvelopeExtractor {
    fn name(&self) -> &'static str {
        "result_envelope"
    }

    fn extract(&self, raw: &AgentResponse, current: &mut NormalizedResponse) {
        if let Some(success) = raw.result.get("success").and_then(Value::as_bool) {
            current.success = success;
        }
        merge_tools(current, raw.result.get("tools_used"));
        if let Some(error) = error_message(&raw.result) {
            current.message = Some(error);
        }
    }
}

/// `result.output.result.success`, the tool-call result nested in a runtime envelope.
pub struct ToolResultExtractor;

impl ResponseExtractor for ToolResultExtractor {
    fn name(&self) -> &'static str {
        "tool_result"
    }

    fn extract(&self, raw: &AgentResponse, current: &mut NormalizedResponse) {
        let Some(tool_result) = raw.result.pointer("/output/result") else {
            return;
        };
        if let Some(success) = tool_result.get("success").and_then(Value::as_bool) {
            current.success = success;
            current.payload = tool_result.clone();
        }
        if let Some(error) = error_message(tool_result) {
            current.message = Some(error);
        }
    }
}

/// A JSON object embedded in the free-text `response`.
pub struct EmbeddedJsonExtractor;

impl ResponseExtractor for EmbeddedJsonExtractor {
    fn name(&self) -> &'static str {
        "embedded_json"
    }

    fn extract(&self, raw: &AgentResponse, current: &mut NormalizedResponse) {
        let trimmed = raw.response.trim();
        if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
            return;
        }
        let Ok(parsed) = serde_json::from_str::<Value>(trimmed) else {
            return;
        };
        if let Some(success) = parsed.get("success").and_then(Value::as_bool) {
            current.success = success;
        }
        merge_tools(current, parsed.get("tools_used"));
        if current.payload.is_null() {
            current.payload = parsed.get("result").cloned().unwrap_or_else(|| parsed.clone());
        }
        if let Some(error) = error_message(&parsed) {
            current.message = Some(error);
        }
    }
}

fn merge_tools(current: &mut NormalizedResponse, tools: Option<&Value>) {
    let Some(Value::Array(tools)) = tools else {
        return;
    };
    for tool in tools.iter().filter_map(Value::as_str) {
        if !current.tools_used.iter().any(|t| t == tool) {
            current.tools_used.push(tool.to_string());
        }
    }
}

fn error_message(value: &Value) -> Option<String> {
    value
        .get("error")
        .or_else(|| value.get("message").filter(|_| value.get("success") == Some(&Value::Bool(false))))
        .map(|e| match e {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

/// Ordered chain of extractors, outermost envelope first.
pub struct ResponseNormalizer {
    extractors: Vec<Box<dyn ResponseExtractor>>,
}

impl Default for ResponseNormalizer {
    fn default() -> Self {
        Self::new()
            .with_extractor(TopLevelExtractor)
            .with_extractor(ResultEnvelopeExtractor)
            .with_extractor(ToolResultExtractor)
            .with_extractor(EmbeddedJsonExtractor)
    }
}

impl ResponseNormalizer {
    /// An empty chain. Use [`Default`] for the standard one.
    pub fn new() -> Self {
        Self { extractors: Vec::new() }
    }

    pub fn with_extractor(mut self, extractor: impl ResponseExtractor + 'static) -> Self {
        self.extractors.push(Box::new(extractor));
        self
    }

    pub fn extractor_names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    pub fn normalize(&self, raw: &AgentResponse) -> NormalizedResponse {
        let mut normalized = NormalizedResponse {
            success: raw.success,
            tools_used: Vec::new(),
            payload: Value::Null,
            message: None,
        };
        for extractor in &self.extractors {
            extractor.extract(raw, &mut normalized);
        }
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_success() {
        let normalized = ResponseNormalizer::default()
            .normalize(&AgentResponse::ok("profile stored").with_tools(&["store_profile"]));
        assert!(normalized.success);
        assert_eq!(normalized.tools_used, vec!["store_profile"]);
        assert_eq!(normalized.message.as_deref(), Some("profile stored"));
    }

    #[test]
    fn test_nested_tool_failure_overrides_top_level() {
        let raw = AgentResponse::ok("done").with_result(json!({
            "success": true,
            "output": {"result": {"success": false, "error": "smtp refused"}}
        }));
        let normalized = ResponseNormalizer::default().normalize(&raw);
        assert!(!normalized.success);
        assert_eq!(normalized.message.as_deref(), Some("smtp refused"));
        assert_eq!(normalized.payload, json!({"success": false, "error": "smtp refused"}));
    }

    #[test]
    fn test_result_envelope_failure() {
        let raw = AgentResponse::ok("ok").with_result(json!({"success": false, "error": "quota"}));
        let normalized = ResponseNormalizer::default().normalize(&raw);
        assert!(!normalized.success);
        assert_eq!(normalized.message.as_deref(), Some("quota"));
    }

    #[test]
    fn test_nested_success_overrides_failed_top_level() {
        let raw = AgentResponse::failed("timeout talking to model")
            .with_result(json!({"output": {"result": {"success": true, "emp_id": "E1"}}}));
        let normalized = ResponseNormalizer::default().normalize(&raw);
        assert!(normalized.success);
        assert_eq!(normalized.payload["emp_id"], json!("E1"));
    }

    #[test]
    fn test_embedded_json_response() {
        let raw = AgentResponse::ok(r#"{"success": false, "tools_used": ["send_email"], "error": "bounced"}"#);
        let normalized = ResponseNormalizer::default().normalize(&raw);
        assert!(!normalized.success);
        assert_eq!(normalized.tools_used, vec!["send_email"]);
        assert_eq!(normalized.message.as_deref(), Some("bounced"));
    }

    #[test]
    fn test_plain_text_is_left_alone() {
        let normalized = ResponseNormalizer::default().normalize(&AgentResponse::ok("{not json"));
        assert!(normalized.success);
        assert_eq!(normalized.payload, Value::Null);
    }

    #[test]
    fn test_chain_order() {
        assert_eq!(
            ResponseNormalizer::default().extractor_names(),
            vec!["top_level", "result_envelope", "tool_result", "embedded_json"]
        );
    }
}
