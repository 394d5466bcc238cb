use chrono::Utc;
use rusqlite::Connection;
use std::sync::Arc;
use uuid::Uuid;

/// A guardian/staff notification produced as a side effect of a write.
/// Delivery is best-effort and at-most-once: the log row is the record of
/// the enqueue, and the send happens on a detached thread after the owning
/// transaction has committed. Failures are logged and dropped.
#[derive(Debug, Clone)]
pub struct Notification {
    pub student_id: Option<String>,
    pub kind: &'static str,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Seam for the external mail transport.
pub trait Mailer: Send + Sync {
    fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Default transport: records the send in the process log. The real SMTP
/// relay lives outside this daemon and is wired in by the host.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        log::info!(
            "mail to {}: {} ({})",
            notification.recipient,
            notification.subject,
            notification.kind
        );
        Ok(())
    }
}

/// Writes the notification to the log table and hands it to the mailer
/// without awaiting the result. Must never fail the caller: log write errors
/// are swallowed after logging.
pub fn enqueue(conn: &Connection, mailer: &Arc<dyn Mailer>, notification: Notification) {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    let result = conn.execute(
        "INSERT INTO notification_log(id, student_id, kind, recipient, subject, body, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &notification.student_id,
            notification.kind,
            &notification.recipient,
            &notification.subject,
            &notification.body,
            &created_at,
        ),
    );
    if let Err(e) = result {
        log::warn!("notification log write failed: {}", e);
    }

    let mailer = Arc::clone(mailer);
    std::thread::spawn(move || {
        if let Err(e) = mailer.send(&notification) {
            log::warn!(
                "notification send to {} failed: {}",
                notification.recipient,
                e
            );
        }
    });
}
