//! User-facing notifications
//!
//! The batch upload manager reports a summary of each batch through a [`Notifier`].
//! The default implementation writes to the log; the UI layer can plug in its own.

use serde::Serialize;

use crate::domain::uploads::BatchUploadResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

/// Summary of one batch upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadNotification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub succeeded: usize,
    pub failed: usize,
    pub retries: u32,
}

impl UploadNotification {
    /// Summary for a finished batch, `None` when nothing needed uploading.
    pub fn for_batch(result: &BatchUploadResult, uploaded: usize) -> Option<Self> {
        let failed = result.failed_uploads.len();
        let total = uploaded + failed;
        if total == 0 {
            return None;
        }

        let retry_note = match result.total_retries {
            0 => String::new(),
            1 => " after 1 retry".to_string(),
            n => format!(" after {} retries", n),
        };

        let (level, title, message) = if failed == 0 {
            (
                NotificationLevel::Success,
                "Images uploaded".to_string(),
                format!("{} of {} images uploaded{}", uploaded, total, retry_note),
            )
        } else if uploaded > 0 {
            (
                NotificationLevel::Warning,
                "Some images failed to upload".to_string(),
                format!(
                    "{} of {} images uploaded{}; {} can be retried",
                    uploaded, total, retry_note, failed
                ),
            )
        } else {
            (
                NotificationLevel::Error,
                "Image upload failed".to_string(),
                format!("None of the {} images could be uploaded{}", total, retry_note),
            )
        };

        Some(Self {
            level,
            title,
            message,
            succeeded: uploaded,
            failed,
            retries: result.total_retries,
        })
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &UploadNotification);
}

/// Logs notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: &UploadNotification) {
        match n.level {
            NotificationLevel::Success => tracing::info!(
                succeeded = n.succeeded,
                retries = n.retries,
                title = %n.title,
                "{}", n.message
            ),
            NotificationLevel::Warning | NotificationLevel::Error => tracing::warn!(
                succeeded = n.succeeded,
                failed = n.failed,
                retries = n.retries,
                title = %n.title,
                "{}", n.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(failed: usize, retries: u32) -> BatchUploadResult {
        BatchUploadResult {
            failed_uploads: vec!["data:image/png;base64,AA==".to_string(); failed],
            total_retries: retries,
            ..Default::default()
        }
    }

    #[test]
    fn summary_levels() {
        let ok = UploadNotification::for_batch(&result(0, 0), 3).unwrap();
        assert_eq!(ok.level, NotificationLevel::Success);
        assert_eq!(ok.message, "3 of 3 images uploaded");

        let partial = UploadNotification::for_batch(&result(1, 2), 2).unwrap();
        assert_eq!(partial.level, NotificationLevel::Warning);
        assert_eq!(partial.message, "2 of 3 images uploaded after 2 retries; 1 can be retried");

        let failed = UploadNotification::for_batch(&result(2, 1), 0).unwrap();
        assert_eq!(failed.level, NotificationLevel::Error);
        assert_eq!(failed.failed, 2);
    }

    #[test]
    fn nothing_uploaded_nothing_to_say() {
        assert!(UploadNotification::for_batch(&result(0, 0), 0).is_none());
    }
}
