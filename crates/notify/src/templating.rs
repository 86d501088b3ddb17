//! Minijinja template rendering for alert messages.
//!
//! Templates are arbitrary strings from destination config, so a fresh
//! [`minijinja::Environment`] is built per render call.

use std::collections::BTreeMap;

use guardian_core::Alert;

use crate::traits::NotifyError;

/// Default subject line for channels that need one.
pub const DEFAULT_SUBJECT: &str = "[{{ alert.severity | upper }}] {{ alert.title }}";

/// Default plain-text body.
pub const DEFAULT_BODY: &str = "\
{{ alert.message }}

Workload: {{ workload.namespace }}/{{ workload.name }}
Kind:     {{ alert.kind }}
Severity: {{ alert.severity }}
Monitor:  {{ alert.monitor }}
Time:     {{ alert.timestamp }}
{% for k, v in alert.context | items %}{{ k }}: {{ v }}
{% endfor %}";

/// Context data available to alert templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateContext {
    pub alert: AlertContext,
    pub workload: WorkloadContext,
    /// `"trigger"` or `"test"`.
    pub event: String,
    /// Render time in RFC 3339.
    pub now: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertContext {
    pub key: String,
    /// Dedup-key suffix, e.g. `SLA/SuccessRate`.
    pub kind: String,
    pub severity: String,
    pub title: String,
    pub message: String,
    pub monitor: String,
    pub context: BTreeMap<String, String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkloadContext {
    pub namespace: String,
    pub name: String,
}

impl TemplateContext {
    pub fn from_alert(alert: &Alert, event: &str) -> Self {
        Self {
            alert: AlertContext {
                key: alert.key.clone(),
                kind: alert.kind.key_suffix().to_string(),
                severity: alert.severity.to_string(),
                title: alert.title.clone(),
                message: alert.message.clone(),
                monitor: alert.monitor.clone(),
                context: alert.context.clone(),
                timestamp: alert.timestamp.to_rfc3339(),
            },
            workload: WorkloadContext {
                namespace: alert.workload.namespace.clone(),
                name: alert.workload.name.clone(),
            },
            event: event.to_string(),
            now: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Renders alert templates using minijinja.
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env.add_function("env", env_function);
        env
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &TemplateContext) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Render `template_str` for a triggered alert.
    pub fn render_alert(&self, template_str: &str, alert: &Alert) -> Result<String, NotifyError> {
        self.render(template_str, &TemplateContext::from_alert(alert, "trigger"))
    }

    /// Subject and body using the default templates.
    pub fn default_message(&self, alert: &Alert) -> Result<(String, String), NotifyError> {
        let ctx = TemplateContext::from_alert(alert, "trigger");
        Ok((self.render(DEFAULT_SUBJECT, &ctx)?, self.render(DEFAULT_BODY, &ctx)?))
    }

    /// Check syntax without evaluating.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }
}

/// Round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// Read an environment variable; empty string (with a warning) if unset.
fn env_function(name: String) -> String {
    match std::env::var(&name) {
        Ok(val) => val,
        Err(_) => {
            tracing::warn!(var = %name, "Environment variable not found, returning empty string");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use guardian_core::{AlertKind, Severity, WorkloadId};

    fn sample_alert() -> Alert {
        Alert::new(
            WorkloadId::new("prod", "nightly-report"),
            AlertKind::SlaSuccessRate,
            "Success rate below target",
            "Success rate 80.0% is below 95.0%",
        )
        .with_monitor("sla-recalc")
        .with_context("success_rate", "80.0")
        .with_context("window_days", 7)
        .with_timestamp(
            DateTime::parse_from_rfc3339("2026-02-16T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    #[test]
    fn render_basic_template() {
        let renderer = TemplateRenderer::new();
        let out = renderer
            .render_alert("{{ alert.title }} for {{ workload.namespace }}/{{ workload.name }}", &sample_alert())
            .unwrap();
        assert_eq!(out, "Success rate below target for prod/nightly-report");
    }

    #[test]
    fn render_kind_and_key() {
        let renderer = TemplateRenderer::new();
        let out = renderer
            .render_alert("{{ alert.kind }} | {{ alert.key }}", &sample_alert())
            .unwrap();
        assert_eq!(out, "SLA/SuccessRate | prod/nightly-report/SLA/SuccessRate");
    }

    #[test]
    fn render_context_lookup() {
        let renderer = TemplateRenderer::new();
        let out = renderer
            .render_alert("rate={{ alert.context.success_rate }}", &sample_alert())
            .unwrap();
        assert_eq!(out, "rate=80.0");
    }

    #[test]
    fn default_subject_uppercases_severity() {
        let renderer = TemplateRenderer::new();
        let alert = sample_alert().with_severity(Severity::Critical);
        let (subject, body) = renderer.default_message(&alert).unwrap();
        assert_eq!(subject, "[CRITICAL] Success rate below target");
        assert!(body.starts_with("Success rate 80.0% is below 95.0%"));
        assert!(body.contains("Workload: prod/nightly-report"));
        assert!(body.contains("window_days: 7"));
    }

    #[test]
    fn render_round_filter() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render_alert("{{ 0.987654 | round(2) }}", &sample_alert()).unwrap();
        assert_eq!(out, "0.99");
    }

    #[test]
    fn render_env_function() {
        std::env::set_var("GUARDIAN_NOTIFY_TEST_VAR", "hello_notify");
        let renderer = TemplateRenderer::new();
        let out = renderer
            .render_alert("Env: {{ env('GUARDIAN_NOTIFY_TEST_VAR') }}", &sample_alert())
            .unwrap();
        assert_eq!(out, "Env: hello_notify");
        std::env::remove_var("GUARDIAN_NOTIFY_TEST_VAR");
    }

    #[test]
    fn render_env_missing_returns_empty() {
        let renderer = TemplateRenderer::new();
        let out = renderer
            .render_alert("Env: [{{ env('DEFINITELY_NOT_SET_XYZ') }}]", &sample_alert())
            .unwrap();
        assert_eq!(out, "Env: []");
    }

    #[test]
    fn invalid_template_produces_error() {
        let renderer = TemplateRenderer::new();
        match renderer.render_alert("{{ unclosed", &sample_alert()) {
            Err(NotifyError::Template(msg)) => assert!(!msg.is_empty()),
            other => panic!("Expected Template error, got: {other:?}"),
        }
    }

    #[test]
    fn validate_templates() {
        let renderer = TemplateRenderer::new();
        assert!(renderer.validate(DEFAULT_SUBJECT).is_ok());
        assert!(renderer.validate(DEFAULT_BODY).is_ok());
        assert!(renderer.validate("{{ unclosed").is_err());
    }
}
