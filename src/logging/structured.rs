use std::collections::BTreeMap;
use tracing::{debug, error, info, trace, warn};

/// Context information for log messages
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g., "poller", "enphase", "web")
    pub component: String,
    /// Local system id the messages are about
    pub system_id: Option<String>,
    /// Poll run id for correlating a single poll
    pub run_id: Option<String>,
    /// Additional context fields
    pub extra_fields: BTreeMap<String, String>,
}

impl LogContext {
    /// Create a new log context
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            system_id: None,
            run_id: None,
            extra_fields: BTreeMap::new(),
        }
    }

    /// Set system id
    pub fn with_system(mut self, system_id: &str) -> Self {
        self.system_id = Some(system_id.to_string());
        self
    }

    /// Set poll run id
    pub fn with_run_id(mut self, run_id: String) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Add extra field
    pub fn with_field(mut self, key: &str, value: String) -> Self {
        self.extra_fields.insert(key.to_string(), value);
        self
    }
}

/// Structured logger with context
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    pub(crate) context: LogContext,
}

impl StructuredLogger {
    /// Create a new structured logger with context
    pub fn new(context: LogContext) -> Self {
        Self { context }
    }

    /// Log an info message with context
    pub fn info(&self, message: &str) {
        let fields = self.format_fields();
        info!(%fields, "{}", message);
    }
    /// Log a warning message with context
    pub fn warn(&self, message: &str) {
        let fields = self.format_fields();
        warn!(%fields, "{}", message);
    }
    /// Log an error message with context
    pub fn error(&self, message: &str) {
        let fields = self.format_fields();
        error!(%fields, "{}", message);
    }
    /// Log a debug message with context
    pub fn debug(&self, message: &str) {
        let fields = self.format_fields();
        debug!(%fields, "{}", message);
    }
    /// Log a trace message with context
    pub fn trace(&self, message: &str) {
        let fields = self.format_fields();
        trace!(%fields, "{}", message);
    }

    /// Derive a logger scoped to one system
    pub fn for_system(&self, system_id: &str) -> Self {
        Self::new(self.context.clone().with_system(system_id))
    }

    fn format_fields(&self) -> String {
        let mut fields = vec![format!("component={}", self.context.component)];
        if let Some(ref system_id) = self.context.system_id {
            fields.push(format!("system={}", system_id));
        }
        if let Some(ref run_id) = self.context.run_id {
            fields.push(format!("run={}", run_id));
        }
        for (key, value) in &self.context.extra_fields {
            fields.push(format!("{}={}", key, value));
        }
        fields.join(",")
    }
}

/// Create a logger for a specific component
pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger::new(LogContext::new(component))
}

/// Create a logger with full context
pub fn get_logger_with_context(context: LogContext) -> StructuredLogger {
    StructuredLogger::new(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context() {
        let context = LogContext::new("poller")
            .with_system("roof")
            .with_run_id("run-1".to_string())
            .with_field("vendor", "enphase".to_string());

        assert_eq!(context.component, "poller");
        assert_eq!(context.system_id.as_deref(), Some("roof"));
        assert_eq!(context.run_id.as_deref(), Some("run-1"));
        assert_eq!(
            context.extra_fields.get("vendor").map(String::as_str),
            Some("enphase")
        );
    }

    #[test]
    fn test_format_fields_order() {
        let logger = get_logger_with_context(
            LogContext::new("enphase")
                .with_system("roof")
                .with_field("b", "2".into())
                .with_field("a", "1".into()),
        );
        assert_eq!(
            logger.format_fields(),
            "component=enphase,system=roof,a=1,b=2"
        );
    }

    #[test]
    fn test_for_system_keeps_component() {
        let logger = get_logger("poller").for_system("shed");
        assert_eq!(logger.context.component, "poller");
        assert_eq!(logger.context.system_id.as_deref(), Some("shed"));
    }
}
