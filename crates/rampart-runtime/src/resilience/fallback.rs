//! Canned degraded responses returned when system-level protection is active.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;

/// Template key for triage agents.
pub const TRIAGE: &str = "triage";

/// Template key for data analysis agents.
pub const DATA_ANALYSIS: &str = "data_analysis";

/// Template used for any unregistered key.
pub const GENERAL: &str = "general";

/// Why a degraded response was returned instead of running the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// Too many agents are critical; only canned responses are served
    EmergencyMode,

    /// Too many agents are already in fallback to admit another
    CascadePrevention,
}

/// Canned content for one fallback type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackTemplate {
    pub message: String,

    /// Structured payload callers can render instead of a real result
    #[serde(default)]
    pub data: JsonValue,
}

impl FallbackTemplate {
    pub fn new(message: impl Into<String>, data: JsonValue) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

/// Response served in place of the caller's operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedResponse {
    pub reason: DegradedReason,
    pub agent: String,

    /// Template actually used
    pub fallback_type: String,

    pub message: String,
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
}

/// Emergency templates keyed by fallback type.
///
/// Seeded with `triage`, `data_analysis` and `general`; lookups for unknown
/// types use `general`.
#[derive(Debug)]
pub struct FallbackTemplates {
    templates: RwLock<HashMap<String, FallbackTemplate>>,
}

impl FallbackTemplates {
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            TRIAGE.to_string(),
            FallbackTemplate::new(
                "Automated triage is unavailable while the system is in emergency mode. \
                 The request has been queued for manual review.",
                json!({
                    "priority": "medium",
                    "requires_human_review": true,
                    "automated_assessment": false,
                }),
            ),
        );
        templates.insert(
            DATA_ANALYSIS.to_string(),
            FallbackTemplate::new(
                "Data analysis is temporarily unavailable due to system-wide degradation. \
                 Please retry later.",
                json!({
                    "analysis_available": false,
                    "partial_results": [],
                    "retry_after_seconds": 300,
                }),
            ),
        );
        templates.insert(
            GENERAL.to_string(),
            FallbackTemplate::new(
                "The service is temporarily operating in emergency mode. Please try again later.",
                json!({ "degraded": true }),
            ),
        );

        Self {
            templates: RwLock::new(templates),
        }
    }

    /// Add or replace the template for `fallback_type`.
    pub fn register(&self, fallback_type: impl Into<String>, template: FallbackTemplate) {
        self.templates.write().insert(fallback_type.into(), template);
    }

    /// Template for `fallback_type`, and the key it was found under.
    pub fn resolve(&self, fallback_type: &str) -> (String, FallbackTemplate) {
        let templates = self.templates.read();
        if let Some(template) = templates.get(fallback_type) {
            return (fallback_type.to_string(), template.clone());
        }
        let general = templates.get(GENERAL).cloned().unwrap_or_else(|| {
            FallbackTemplate::new("Service temporarily unavailable.", JsonValue::Null)
        });
        (GENERAL.to_string(), general)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.templates.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Emergency-mode response for `agent`.
    pub fn emergency_response(&self, agent: &str, fallback_type: &str) -> DegradedResponse {
        let (fallback_type, template) = self.resolve(fallback_type);
        DegradedResponse {
            reason: DegradedReason::EmergencyMode,
            agent: agent.to_string(),
            fallback_type,
            message: template.message,
            data: template.data,
            timestamp: Utc::now(),
        }
    }

    /// Cascade-prevention response for `agent`.
    pub fn cascade_response(
        &self,
        agent: &str,
        fallback_type: &str,
        agents_in_fallback: usize,
        limit: usize,
    ) -> DegradedResponse {
        DegradedResponse {
            reason: DegradedReason::CascadePrevention,
            agent: agent.to_string(),
            fallback_type: fallback_type.to_string(),
            message: format!(
                "Request deferred to prevent cascading failures: {agents_in_fallback} agents \
                 are already degraded (limit {limit})."
            ),
            data: json!({
                "agents_in_fallback": agents_in_fallback,
                "max_concurrent_fallbacks": limit,
                "retry_recommended": true,
            }),
            timestamp: Utc::now(),
        }
    }
}

impl Default for FallbackTemplates {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_templates() {
        let templates = FallbackTemplates::new();
        assert_eq!(templates.keys(), vec!["data_analysis", "general", "triage"]);

        let response = templates.emergency_response("agent-1", TRIAGE);
        assert_eq!(response.reason, DegradedReason::EmergencyMode);
        assert_eq!(response.fallback_type, "triage");
        assert_eq!(response.data["requires_human_review"], true);
    }

    #[test]
    fn test_unknown_type_uses_general() {
        let templates = FallbackTemplates::new();
        let response = templates.emergency_response("agent-1", "summarization");
        assert_eq!(response.fallback_type, GENERAL);
        assert_eq!(response.data["degraded"], true);
    }

    #[test]
    fn test_register_replaces_template() {
        let templates = FallbackTemplates::new();
        templates.register(
            "summarization",
            FallbackTemplate::new("No summary available.", json!({"summary": null})),
        );
        let response = templates.emergency_response("agent-1", "summarization");
        assert_eq!(response.fallback_type, "summarization");
        assert_eq!(response.message, "No summary available.");
    }

    #[test]
    fn test_response_serializes_reason() {
        let templates = FallbackTemplates::new();
        let response = templates.cascade_response("agent-5", GENERAL, 4, 3);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["reason"], "cascade_prevention");
        assert_eq!(json["data"]["agents_in_fallback"], 4);
    }
}
