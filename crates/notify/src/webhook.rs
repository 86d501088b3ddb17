//! Generic HTTP webhook notifier.
//!
//! Posts each alert as JSON to a configured URL, with optional custom
//! headers and a minijinja body template.

use std::collections::HashMap;
use std::sync::Arc;

use guardian_core::Alert;

use crate::templating::TemplateRenderer;
use crate::traits::{Notifier, NotifyError};

/// Delivers alerts as JSON over HTTP to a configured endpoint.
///
/// Environment variable references (`${VAR_NAME}`) in the URL and header
/// values are resolved at construction time.
#[derive(Debug)]
pub struct WebhookNotifier {
    /// Target URL (env vars already resolved).
    url: String,
    /// HTTP method (defaults to POST).
    method: reqwest::Method,
    /// Custom headers to include on every request.
    headers: HashMap<String, String>,
    /// Optional minijinja body template. Without one the alert itself is
    /// serialized as the JSON body.
    body_template: Option<String>,
    /// Shared template renderer for body templates.
    renderer: Arc<TemplateRenderer>,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a new webhook notifier.
    ///
    /// Environment variable references (`${VAR_NAME}`) in `url` and
    /// header values are resolved eagerly. Missing env vars produce
    /// a [`NotifyError::Config`] error.
    ///
    /// `method` defaults to `POST` when `None`.
    pub fn new(
        url: String,
        method: Option<reqwest::Method>,
        headers: HashMap<String, String>,
        body_template: Option<String>,
        renderer: Arc<TemplateRenderer>,
    ) -> Result<Self, NotifyError> {
        let resolved_url = resolve_env_vars(&url)?;

        let mut resolved_headers = HashMap::with_capacity(headers.len());
        for (key, value) in &headers {
            resolved_headers.insert(key.clone(), resolve_env_vars(value)?);
        }

        // Validate body template syntax at construction time.
        if let Some(ref tmpl) = body_template {
            renderer
                .validate(tmpl)
                .map_err(|e| NotifyError::Config(format!("invalid body template: {e}")))?;
        }

        Ok(Self {
            url: resolved_url,
            method: method.unwrap_or(reqwest::Method::POST),
            headers: resolved_headers,
            body_template,
            renderer,
            client: reqwest::Client::new(),
        })
    }

    /// Construct a [`WebhookNotifier`] from config-level primitives.
    ///
    /// `method` is parsed from a string (e.g. `"POST"`, `"PUT"`).
    /// Invalid method strings produce [`NotifyError::Config`].
    pub fn from_config(
        url: String,
        method: Option<String>,
        headers: Option<HashMap<String, String>>,
        body_template: Option<String>,
        renderer: Arc<TemplateRenderer>,
    ) -> Result<Self, NotifyError> {
        let parsed_method = match method {
            Some(m) => {
                let upper = m.to_uppercase();
                upper
                    .parse::<reqwest::Method>()
                    .map(Some)
                    .map_err(|_| NotifyError::Config(format!("invalid HTTP method: {m}")))?
            }
            None => None,
        };

        Self::new(
            url,
            parsed_method,
            headers.unwrap_or_default(),
            body_template,
            renderer,
        )
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let body = match &self.body_template {
            Some(tmpl) => self.renderer.render_alert(tmpl, alert)?,
            None => serde_json::to_string(alert)
                .map_err(|e| NotifyError::Config(format!("failed to serialize alert: {e}")))?,
        };

        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body: body_text,
            });
        }

        tracing::debug!(
            key = %alert.key,
            method = %self.method,
            status = %status,
            "webhook accepted alert"
        );

        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

/// Resolve `${VAR_NAME}` patterns in a string using `std::env::var`.
///
/// Returns an error if a referenced variable is not set.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, NotifyError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            // Consume the '{'
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(NotifyError::Config(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            let value = std::env::var(&var_name).map_err(|_| {
                NotifyError::Config(format!("env var not found: {var_name}"))
            })?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> Arc<TemplateRenderer> {
        Arc::new(TemplateRenderer::new())
    }

    fn plain(url: &str) -> WebhookNotifier {
        WebhookNotifier::from_config(url.into(), None, None, None, renderer()).unwrap()
    }

    #[test]
    fn env_refs_resolved_in_url_and_headers() {
        std::env::set_var("GWH_HOST", "hooks.internal");
        std::env::set_var("GWH_TOKEN", "t0ken");
        let headers = HashMap::from([
            ("Authorization".to_string(), "Bearer ${GWH_TOKEN}".to_string()),
            ("X-Source".to_string(), "guardian".to_string()),
        ]);
        let notifier = WebhookNotifier::from_config(
            "https://${GWH_HOST}/alerts".into(),
            None,
            Some(headers),
            None,
            renderer(),
        )
        .unwrap();
        assert_eq!(notifier.url, "https://hooks.internal/alerts");
        assert_eq!(notifier.headers["Authorization"], "Bearer t0ken");
        assert_eq!(notifier.headers["X-Source"], "guardian");
        std::env::remove_var("GWH_HOST");
        std::env::remove_var("GWH_TOKEN");
    }

    #[test]
    fn missing_or_unclosed_env_ref_is_config_error() {
        match resolve_env_vars("https://${GWH_NEVER_SET_98765}/x") {
            Err(NotifyError::Config(msg)) => assert!(msg.contains("GWH_NEVER_SET_98765")),
            other => panic!("expected Config error, got: {other:?}"),
        }
        match resolve_env_vars("https://${GWH_OPEN/x") {
            Err(NotifyError::Config(msg)) => assert!(msg.contains("unclosed")),
            other => panic!("expected Config error, got: {other:?}"),
        }
        assert_eq!(resolve_env_vars("no refs here").unwrap(), "no refs here");
    }

    #[test]
    fn method_parsing() {
        let default = plain("https://example.com");
        assert_eq!(default.method, reqwest::Method::POST);
        assert_eq!(default.channel_name(), "webhook");
        let put = WebhookNotifier::from_config(
            "https://example.com".into(),
            Some("put".into()),
            None,
            None,
            renderer(),
        )
        .unwrap();
        assert_eq!(put.method, reqwest::Method::PUT);
        assert!(WebhookNotifier::from_config(
            "https://example.com".into(),
            Some("NOT A METHOD".into()),
            None,
            None,
            renderer(),
        )
        .is_err());
    }

    #[test]
    fn bad_body_template_rejected_up_front() {
        match WebhookNotifier::from_config(
            "https://example.com".into(),
            None,
            None,
            Some("{{ alert.title".into()),
            renderer(),
        ) {
            Err(NotifyError::Config(msg)) => assert!(msg.contains("invalid body template")),
            other => panic!("expected Config error, got: {other:?}"),
        }
    }
}
