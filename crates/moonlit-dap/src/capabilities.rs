//! Capabilities advertised in the `initialize` response.

use serde::{Deserialize, Serialize};

/// The adapter's static feature table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterCapabilities {
    /// The adapter supports the `configurationDone` request.
    pub supports_configuration_done_request: bool,
    /// The adapter supports function breakpoints.
    pub supports_function_breakpoints: bool,
    /// The adapter supports conditional breakpoints.
    pub supports_conditional_breakpoints: bool,
    /// The adapter supports `evaluate` for hovers.
    pub supports_evaluate_for_hovers: bool,
    /// Exception breakpoint filters offered to the client.
    pub exception_breakpoint_filters: Vec<serde_json::Value>,
}

impl AdapterCapabilities {
    /// The feature table every session declares.
    pub fn fixed() -> Self {
        Self {
            supports_configuration_done_request: false,
            supports_function_breakpoints: false,
            supports_conditional_breakpoints: false,
            supports_evaluate_for_hovers: false,
            exception_breakpoint_filters: Vec::new(),
        }
    }

    /// The table as a response body.
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Default for AdapterCapabilities {
    fn default() -> Self {
        Self::fixed()
    }
}
