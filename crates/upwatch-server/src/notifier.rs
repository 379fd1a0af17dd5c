//! Outbound mail queue.
//!
//! [`OutboxNotifier`] is the engine-facing [`Notifier`]; it only enqueues.
//! [`Outbox`] owns the receiving half and hands messages to the configured
//! mail endpoint.

use crate::config::MailSettings;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use upwatch::{Notifier, NotifyError};

/// Default outbox capacity
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Bound on sending the spec parse failure notice
pub const PARSE_FAILURE_TIMEOUT: Duration = Duration::from_secs(30);

/// One message waiting for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMail {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl OutboundMail {
    /// Render as an RFC 5322 message
    pub fn render(&self) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n{}",
            self.sender, self.recipient, self.subject, self.body
        )
    }
}

/// Where queued mail goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl fmt::Display for MailEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "smtp+starttls" } else { "smtp" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Enqueues notifications for the [`Outbox`]
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    sender: String,
    queue: mpsc::Sender<OutboundMail>,
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let mail = OutboundMail {
            sender: self.sender.clone(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        self.queue
            .send(mail)
            .await
            .map_err(|_| NotifyError::Unavailable("outbox closed".to_string()))
    }
}

/// Drains queued mail
pub struct Outbox {
    queue: mpsc::Receiver<OutboundMail>,
    endpoint: MailEndpoint,
}

/// Build the notifier/outbox pair when `settings` is complete.
pub fn outbox(settings: &MailSettings, capacity: usize) -> Option<(OutboxNotifier, Outbox)> {
    if !settings.is_complete() {
        info!("mail notifications disabled: mailserver configuration is incomplete");
        return None;
    }

    let (tx, rx) = mpsc::channel(capacity.max(1));
    let endpoint = MailEndpoint {
        host: settings.endpoint.clone().unwrap_or_default(),
        port: settings.port,
        tls: !settings.no_tls,
    };
    let notifier = OutboxNotifier {
        sender: settings.sender.clone().unwrap_or_default(),
        queue: tx,
    };
    Some((notifier, Outbox { queue: rx, endpoint }))
}

impl Outbox {
    pub fn endpoint(&self) -> &MailEndpoint {
        &self.endpoint
    }

    /// Run until cancelled or until every notifier is dropped.
    ///
    /// Mail still queued at cancellation is flushed before returning.
    /// Returns the number of messages handed off.
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        info!(endpoint = %self.endpoint, "Outbox started");
        let mut delivered = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    while let Ok(mail) = self.queue.try_recv() {
                        self.deliver(&mail);
                        delivered += 1;
                    }
                    break;
                }
                received = self.queue.recv() => match received {
                    Some(mail) => {
                        self.deliver(&mail);
                        delivered += 1;
                    }
                    None => break,
                },
            }
        }

        info!(delivered, "Outbox stopped");
        delivered
    }

    fn deliver(&self, mail: &OutboundMail) {
        let message = mail.render();
        debug!(bytes = message.len(), "Rendered outbound message");
        info!(
            endpoint = %self.endpoint,
            sender = %mail.sender,
            recipient = %mail.recipient,
            subject = %mail.subject,
            "mail_queued"
        );
    }
}

/// Tell every recipient that the definitions could not be loaded.
pub async fn notify_parse_failure(
    notifier: Option<&dyn Notifier>,
    recipients: &[String],
    spec_path: &str,
    err: &dyn std::error::Error,
) {
    let Some(notifier) = notifier else {
        warn!("cannot send parse failure email: mail is not configured");
        return;
    };
    if recipients.is_empty() {
        warn!("cannot send parse failure email: no mail receivers configured");
        return;
    }

    let subject = "upwatch spec parse failure";
    let body = format!("failed to parse specs from {:?}\r\nerror: {}\r\n", spec_path, err);

    let send_all = async {
        for recipient in recipients {
            if let Err(e) = notifier.notify(recipient, subject, &body).await {
                error!(recipient = %recipient, error = %e, "failed to send parse failure email");
            }
        }
    };
    if timeout(PARSE_FAILURE_TIMEOUT, send_all).await.is_err() {
        error!(timeout = ?PARSE_FAILURE_TIMEOUT, "parse failure notification timed out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_settings() -> MailSettings {
        MailSettings {
            endpoint: Some("smtp.example.com".to_string()),
            username: Some("mailer".to_string()),
            password: Some("pw".to_string()),
            sender: Some("upwatch@example.com".to_string()),
            receivers: vec!["ops@example.com".to_string()],
            ..MailSettings::default()
        }
    }

    #[test]
    fn test_incomplete_settings_disable_outbox() {
        assert!(outbox(&MailSettings::default(), 8).is_none());

        let mut settings = complete_settings();
        settings.password = None;
        assert!(outbox(&settings, 8).is_none());
    }

    #[test]
    fn test_endpoint_display() {
        let (_, mailbox) = outbox(&complete_settings(), 8).unwrap();
        assert_eq!(mailbox.endpoint().to_string(), "smtp+starttls://smtp.example.com:587");

        let mut settings = complete_settings();
        settings.no_tls = true;
        settings.port = 25;
        let (_, mailbox) = outbox(&settings, 8).unwrap();
        assert_eq!(mailbox.endpoint().to_string(), "smtp://smtp.example.com:25");
    }

    #[test]
    fn test_render() {
        let mail = OutboundMail {
            sender: "upwatch@example.com".to_string(),
            recipient: "ops@example.com".to_string(),
            subject: "upwatch failure".to_string(),
            body: "spec failed: api\r\n".to_string(),
        };
        assert_eq!(
            mail.render(),
            "From: upwatch@example.com\r\nTo: ops@example.com\r\nSubject: upwatch failure\r\n\r\nspec failed: api\r\n"
        );
    }
}
