//! SMTP email notifier via `lettre`.
//!
//! Subject and body come from the default alert templates. Port 465 uses
//! implicit TLS, other ports STARTTLS unless TLS is turned off.

use std::sync::Arc;

use guardian_core::Alert;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

use crate::templating::TemplateRenderer;
use crate::traits::{Notifier, NotifyError};

/// SMTP connection settings for one email destination.
#[derive(Debug, Clone)]
pub struct SmtpSettings<'a> {
    pub host: &'a str,
    pub port: Option<u16>,
    pub tls: Option<bool>,
    pub from: &'a str,
    pub to: &'a [String],
}

#[derive(Debug)]
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    renderer: Arc<TemplateRenderer>,
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, NotifyError> {
    addr.parse()
        .map_err(|e: lettre::address::AddressError| NotifyError::Config(format!("{addr}: {e}")))
}

impl EmailNotifier {
    /// Build from SMTP settings.
    ///
    /// Credentials come from `SMTP_USERNAME` / `SMTP_PASSWORD` when both are
    /// set; otherwise the connection is unauthenticated.
    pub fn from_config(
        smtp: SmtpSettings<'_>,
        renderer: Arc<TemplateRenderer>,
    ) -> Result<Self, NotifyError> {
        let from = parse_mailbox(smtp.from)?;
        let to = smtp
            .to
            .iter()
            .map(|addr| parse_mailbox(addr))
            .collect::<Result<Vec<_>, _>>()?;

        if to.is_empty() {
            return Err(NotifyError::Config(
                "at least one recipient is required".to_string(),
            ));
        }

        let port = smtp.port.unwrap_or(587);
        let mut builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else if smtp.tls.unwrap_or(true) {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp.host).port(port)
        };

        if let (Ok(username), Ok(password)) =
            (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD"))
        {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
            renderer,
        })
    }

    fn message(&self, alert: &Alert) -> Result<Message, NotifyError> {
        let (subject, body) = self.renderer.default_message(alert)?;
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        builder.body(body).map_err(|e| NotifyError::Smtp(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let email = self.message(alert)?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        tracing::debug!(
            key = %alert.key,
            recipients = self.to.len(),
            "alert email accepted by relay"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_core::{AlertKind, WorkloadId};

    fn settings<'a>(port: Option<u16>, tls: Option<bool>, from: &'a str, to: &'a [String]) -> SmtpSettings<'a> {
        SmtpSettings {
            host: "smtp.example.com",
            port,
            tls,
            from,
            to,
        }
    }

    fn renderer() -> Arc<TemplateRenderer> {
        Arc::new(TemplateRenderer::new())
    }

    #[tokio::test]
    async fn builds_for_each_tls_mode() {
        let to = vec!["oncall@example.com".to_string()];
        for (port, tls) in [(Some(587), Some(true)), (Some(465), None), (Some(25), Some(false)), (None, None)] {
            assert!(
                EmailNotifier::from_config(settings(port, tls, "guardian@example.com", &to), renderer()).is_ok(),
                "port {port:?} tls {tls:?}"
            );
        }
    }

    #[test]
    fn bad_addresses_are_config_errors() {
        let to = vec!["oncall@example.com".to_string()];
        let err = EmailNotifier::from_config(settings(None, None, "nope", &to), renderer())
            .unwrap_err()
            .to_string();
        assert!(err.contains("Configuration error"), "got: {err}");

        let bad_to = vec!["not-valid".to_string()];
        assert!(EmailNotifier::from_config(
            settings(None, None, "guardian@example.com", &bad_to),
            renderer()
        )
        .is_err());
    }

    #[test]
    fn requires_a_recipient() {
        let err = EmailNotifier::from_config(settings(None, None, "guardian@example.com", &[]), renderer())
            .unwrap_err()
            .to_string();
        assert!(err.contains("at least one recipient"), "got: {err}");
    }

    #[tokio::test]
    async fn message_uses_default_subject() {
        let to = vec![
            "Ops <ops@example.com>".to_string(),
            "dba@example.com".to_string(),
        ];
        let notifier = EmailNotifier::from_config(
            settings(Some(25), Some(false), "Guardian <guardian@example.com>", &to),
            renderer(),
        )
        .unwrap();
        let alert = Alert::new(
            WorkloadId::new("prod", "vacuum"),
            AlertKind::SlaMaxDuration,
            "Runs too slow",
            "P95 41m exceeds 30m",
        );
        let raw = String::from_utf8(notifier.message(&alert).unwrap().formatted()).unwrap();
        assert!(raw.contains("Subject: [WARNING] Runs too slow"), "got: {raw}");
        assert!(raw.contains("P95 41m exceeds 30m"));
        assert!(raw.contains("dba@example.com"));
        assert_eq!(notifier.channel_name(), "email");
    }
}
