use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{invalid_json, non_empty, BreakpointKind, Notifier, SendTarget};
use crate::error::DapError;
use crate::protocol;

/// An exception filter advertised by the adapter, with the user's choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionBreakpointsFilter {
    pub dap: protocol::ExceptionBreakpointsFilter,
    pub enabled: bool,
    #[serde(default)]
    pub condition: Option<String>,
}

/// Mutable fields of an [`ExceptionBreakpointsFilter`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionBreakpointsFilterEdit {
    pub enabled: bool,
    /// Dropped for filters that take no condition.
    pub condition: Option<String>,
}

pub struct ExceptionBreakpointsFilters {
    filters: Mutex<Vec<ExceptionBreakpointsFilter>>,
    notifier: Arc<Notifier>,
}

impl ExceptionBreakpointsFilters {
    pub(crate) fn new(notifier: Arc<Notifier>) -> Self {
        Self {
            filters: Mutex::new(Vec::new()),
            notifier,
        }
    }

    fn send(&self) {
        self.notifier
            .send(BreakpointKind::Filter, SendTarget::Filters);
    }

    /// Replace the filter set with what an adapter just advertised.
    ///
    /// Known filters keep their enabled state, and their condition when
    /// the filter accepts one. New filters start at the adapter default.
    pub fn update(&self, advertised: Vec<protocol::ExceptionBreakpointsFilter>) {
        {
            let mut filters = self.filters.lock();
            let updated = advertised
                .into_iter()
                .map(|dap| {
                    let previous = filters.iter().find(|f| f.dap.filter == dap.filter);
                    let (enabled, condition) = match previous {
                        Some(old) => {
                            let condition = if dap.supports_condition.unwrap_or(false) {
                                old.condition.clone()
                            } else {
                                None
                            };
                            (old.enabled, condition)
                        }
                        None => (dap.default.unwrap_or(false), None),
                    };
                    ExceptionBreakpointsFilter {
                        dap,
                        enabled,
                        condition,
                    }
                })
                .collect();
            *filters = updated;
        }
        self.notifier.updated(BreakpointKind::Filter);
    }

    pub fn toggle_enabled(&self, filter_id: &str) -> bool {
        let found = {
            let mut filters = self.filters.lock();
            match filters.iter_mut().find(|f| f.dap.filter == filter_id) {
                Some(filter) => {
                    filter.enabled = !filter.enabled;
                    true
                }
                None => false,
            }
        };
        if found {
            self.send();
        }
        found
    }

    pub fn set_condition(&self, filter_id: &str, condition: Option<String>) -> bool {
        let found = {
            let mut filters = self.filters.lock();
            match filters.iter_mut().find(|f| f.dap.filter == filter_id) {
                Some(filter) => {
                    filter.condition = non_empty(condition);
                    true
                }
                None => false,
            }
        };
        if found {
            self.send();
        }
        found
    }

    pub fn edit(&self, filter_id: &str) -> Option<ExceptionBreakpointsFilterEdit> {
        self.get(filter_id).map(|f| ExceptionBreakpointsFilterEdit {
            enabled: f.enabled,
            condition: f.condition,
        })
    }

    pub fn apply_edit(&self, filter_id: &str, edit: ExceptionBreakpointsFilterEdit) -> bool {
        let found = {
            let mut filters = self.filters.lock();
            match filters.iter_mut().find(|f| f.dap.filter == filter_id) {
                Some(filter) => {
                    filter.enabled = edit.enabled;
                    filter.condition = if filter.dap.supports_condition.unwrap_or(false) {
                        non_empty(edit.condition)
                    } else {
                        None
                    };
                    true
                }
                None => false,
            }
        };
        if found {
            self.send();
        }
        found
    }

    pub fn get(&self, filter_id: &str) -> Option<ExceptionBreakpointsFilter> {
        self.filters
            .lock()
            .iter()
            .find(|f| f.dap.filter == filter_id)
            .cloned()
    }

    pub fn all(&self) -> Vec<ExceptionBreakpointsFilter> {
        self.filters.lock().clone()
    }

    pub fn enabled(&self) -> Vec<ExceptionBreakpointsFilter> {
        self.filters
            .lock()
            .iter()
            .filter(|f| f.enabled)
            .cloned()
            .collect()
    }

    pub fn into_json(&self) -> Value {
        serde_json::to_value(&*self.filters.lock()).unwrap_or(Value::Null)
    }

    pub fn load_json(&self, value: &Value) -> Result<(), DapError> {
        let loaded: Vec<ExceptionBreakpointsFilter> =
            serde_json::from_value(value.clone()).map_err(|e| invalid_json("filter", e))?;
        *self.filters.lock() = loaded;
        self.notifier.updated(BreakpointKind::Filter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoints::{Breakpoints, BreakpointsEvent};

    fn filter(id: &str, default: bool, supports_condition: bool) -> protocol::ExceptionBreakpointsFilter {
        protocol::ExceptionBreakpointsFilter {
            filter: id.into(),
            label: id.to_uppercase(),
            default: Some(default),
            supports_condition: Some(supports_condition),
            ..protocol::ExceptionBreakpointsFilter::default()
        }
    }

    #[test]
    fn filters_update_reconciles_previous_state() {
        let breakpoints = Breakpoints::new();
        let filters = &breakpoints.filters;
        filters.update(vec![filter("raised", false, true), filter("uncaught", true, false)]);
        assert!(!filters.get("raised").unwrap().enabled);
        assert!(filters.get("uncaught").unwrap().enabled);

        filters.toggle_enabled("raised");
        filters.set_condition("raised", Some("e is ValueError".into()));
        filters.set_condition("uncaught", Some("x".into()));

        filters.update(vec![
            filter("raised", false, true),
            filter("uncaught", true, false),
            filter("user", true, false),
        ]);
        let raised = filters.get("raised").unwrap();
        assert!(raised.enabled);
        assert_eq!(raised.condition.as_deref(), Some("e is ValueError"));
        assert!(filters.get("uncaught").unwrap().condition.is_none());
        assert!(filters.get("user").unwrap().enabled);

        filters.update(vec![filter("user", false, false)]);
        assert_eq!(filters.all().len(), 1);
        assert!(filters.get("raised").is_none());
        assert!(filters.get("user").unwrap().enabled);
    }

    #[tokio::test]
    async fn filters_update_does_not_request_send() {
        let breakpoints = Breakpoints::new();
        let mut events = breakpoints.subscribe();
        breakpoints.filters.update(vec![filter("raised", true, false)]);
        assert_eq!(
            events.recv().await,
            Some(BreakpointsEvent::Updated(BreakpointKind::Filter))
        );
        assert!(events.try_recv().is_err());

        breakpoints.filters.toggle_enabled("raised");
        events.recv().await;
        assert_eq!(
            events.recv().await,
            Some(BreakpointsEvent::Send(SendTarget::Filters))
        );
        assert!(breakpoints.filters.enabled().is_empty());
    }

    #[test]
    fn filters_edit_round_trips_user_fields() {
        let breakpoints = Breakpoints::new();
        let filters = &breakpoints.filters;
        filters.update(vec![filter("raised", false, true), filter("uncaught", true, false)]);

        let mut edit = filters.edit("raised").unwrap();
        assert_eq!(
            edit,
            ExceptionBreakpointsFilterEdit {
                enabled: false,
                condition: None,
            }
        );
        edit.enabled = true;
        edit.condition = Some("e is KeyError".into());
        assert!(filters.apply_edit("raised", edit));
        let raised = filters.get("raised").unwrap();
        assert!(raised.enabled);
        assert_eq!(raised.condition.as_deref(), Some("e is KeyError"));

        let edit = ExceptionBreakpointsFilterEdit {
            enabled: false,
            condition: Some("ignored".into()),
        };
        assert!(filters.apply_edit("uncaught", edit.clone()));
        let uncaught = filters.get("uncaught").unwrap();
        assert!(!uncaught.enabled);
        assert!(uncaught.condition.is_none());

        assert!(filters.edit("missing").is_none());
        assert!(!filters.apply_edit("missing", edit));
    }

    #[tokio::test]
    async fn filters_apply_edit_requests_send() {
        let breakpoints = Breakpoints::new();
        breakpoints.filters.update(vec![filter("raised", false, true)]);
        let mut events = breakpoints.subscribe();

        let mut edit = breakpoints.filters.edit("raised").unwrap();
        edit.condition = Some(String::new());
        breakpoints.filters.apply_edit("raised", edit);
        assert_eq!(
            events.recv().await,
            Some(BreakpointsEvent::Updated(BreakpointKind::Filter))
        );
        assert_eq!(
            events.recv().await,
            Some(BreakpointsEvent::Send(SendTarget::Filters))
        );
        assert!(breakpoints.filters.get("raised").unwrap().condition.is_none());
    }
}
