use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

impl Notification {
    /// `details` is appended to the body; the run log is attached when it
    /// can be read.
    pub fn compose(
        job_name: &str,
        error: Option<&str>,
        details: Option<&str>,
        log_file: Option<&Path>,
    ) -> Self {
        let (subject, mut body) = match error {
            Some(message) => (
                format!("{job_name} - Error"),
                format!("{job_name} encountered an error.\n{message}"),
            ),
            None => (
                format!("{job_name} - Success"),
                format!("{job_name} completed successfully."),
            ),
        };
        if let Some(details) = details {
            body.push_str("\n\n");
            body.push_str(details);
        }

        let attachment = log_file.and_then(|path| {
            let content = std::fs::read_to_string(path).ok()?;
            let filename = path.file_name()?.to_string_lossy().into_owned();
            Some(Attachment { filename, content })
        });

        Self {
            subject,
            body,
            attachment,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Posts the notification as JSON to an operator webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        tracing::info!(subject = %notification.subject, "notification sent");
        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::info!(subject = %notification.subject, body = %notification.body, "notification");
        Ok(())
    }
}

pub fn notifier_for(webhook_url: Option<&str>) -> Box<dyn Notifier> {
    match webhook_url {
        Some(url) => Box::new(WebhookNotifier::new(url)),
        None => Box::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_message_names_the_job() {
        let notification = Notification::compose("SeeSaw", None, Some("Inserted 1 new records."), None);
        assert_eq!(notification.subject, "SeeSaw - Success");
        assert_eq!(
            notification.body,
            "SeeSaw completed successfully.\n\nInserted 1 new records."
        );
        assert_eq!(notification.attachment, None);
    }

    #[test]
    fn error_message_carries_the_reason() {
        let notification = Notification::compose("SeeSaw", Some("warehouse unavailable"), None, None);
        assert_eq!(notification.subject, "SeeSaw - Error");
        assert_eq!(notification.body, "SeeSaw encountered an error.\nwarehouse unavailable");
    }

    #[test]
    fn attaches_run_log_when_present() {
        let path = std::env::temp_dir().join(format!("seesaw-{}.log", uuid::Uuid::new_v4()));
        std::fs::write(&path, "INFO run started\n").unwrap();
        let notification = Notification::compose("SeeSaw", None, None, Some(&path));
        std::fs::remove_file(&path).unwrap();

        let attachment = notification.attachment.unwrap();
        assert_eq!(attachment.content, "INFO run started\n");
        assert!(attachment.filename.ends_with(".log"));
    }

    #[test]
    fn missing_log_is_skipped() {
        let path = std::env::temp_dir().join("seesaw-does-not-exist.log");
        let notification = Notification::compose("SeeSaw", None, None, Some(&path));
        assert_eq!(notification.attachment, None);
    }

    #[test]
    fn serializes_for_the_webhook() {
        let notification = Notification::compose("SeeSaw", None, None, None);
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["subject"], "SeeSaw - Success");
        assert!(json["attachment"].is_null());
    }
}
