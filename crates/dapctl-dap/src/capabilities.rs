//! DAP capabilities tracking.

use crate::protocol::{Capabilities, ExceptionBreakpointsFilter};

/// Resolved capabilities of the debug adapter, stored as plain booleans.
///
/// A flag the adapter did not send counts as unsupported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DapCapabilities {
    pub supports_configuration_done_request: bool,
    pub supports_function_breakpoints: bool,
    pub supports_conditional_breakpoints: bool,
    pub supports_hit_conditional_breakpoints: bool,
    pub supports_log_points: bool,
    pub supports_data_breakpoints: bool,
    pub supports_evaluate_for_hovers: bool,
    pub supports_step_back: bool,
    pub supports_set_variable: bool,
    pub supports_completions_request: bool,
    pub supports_exception_info_request: bool,
    pub supports_terminate_request: bool,
    pub supports_read_memory_request: bool,
    pub supports_disassemble_request: bool,
    pub supports_exception_filter_options: bool,
    pub supports_stepping_granularity: bool,
    /// Exception filters advertised by the adapter, in adapter order.
    pub exception_breakpoint_filters: Vec<ExceptionBreakpointsFilter>,
}

impl DapCapabilities {
    /// Build [`DapCapabilities`] from the protocol-level [`Capabilities`]
    /// returned by the adapter in the `initialize` response.
    pub fn from_initialize_response(caps: &Capabilities) -> Self {
        let flag = |value: Option<bool>| value.unwrap_or(false);
        Self {
            supports_configuration_done_request: flag(caps.supports_configuration_done_request),
            supports_function_breakpoints: flag(caps.supports_function_breakpoints),
            supports_conditional_breakpoints: flag(caps.supports_conditional_breakpoints),
            supports_hit_conditional_breakpoints: flag(caps.supports_hit_conditional_breakpoints),
            supports_log_points: flag(caps.supports_log_points),
            supports_data_breakpoints: flag(caps.supports_data_breakpoints),
            supports_evaluate_for_hovers: flag(caps.supports_evaluate_for_hovers),
            supports_step_back: flag(caps.supports_step_back),
            supports_set_variable: flag(caps.supports_set_variable),
            supports_completions_request: flag(caps.supports_completions_request),
            supports_exception_info_request: flag(caps.supports_exception_info_request),
            supports_terminate_request: flag(caps.supports_terminate_request),
            supports_read_memory_request: flag(caps.supports_read_memory_request),
            supports_disassemble_request: flag(caps.supports_disassemble_request),
            supports_exception_filter_options: flag(caps.supports_exception_filter_options),
            supports_stepping_granularity: flag(caps.supports_stepping_granularity),
            exception_breakpoint_filters: caps.exception_breakpoint_filters.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn capabilities_from_partial_response() {
        let caps: Capabilities = serde_json::from_value(json!({
            "supportsConfigurationDoneRequest": true,
            "supportsFunctionBreakpoints": false,
            "supportsTerminateRequest": true,
            "exceptionBreakpointFilters": [
                {"filter": "uncaught", "label": "Uncaught Exceptions", "default": true}
            ]
        }))
        .unwrap();
        let resolved = DapCapabilities::from_initialize_response(&caps);
        assert!(resolved.supports_configuration_done_request);
        assert!(!resolved.supports_function_breakpoints);
        assert!(resolved.supports_terminate_request);
        assert!(!resolved.supports_step_back);
        assert_eq!(resolved.exception_breakpoint_filters.len(), 1);
        assert_eq!(resolved.exception_breakpoint_filters[0].filter, "uncaught");
    }

    #[test]
    fn capabilities_from_empty_response() {
        let resolved = DapCapabilities::from_initialize_response(&Capabilities::default());
        assert_eq!(resolved, DapCapabilities::default());
    }
}
