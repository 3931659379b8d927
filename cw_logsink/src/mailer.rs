//! ABOUTME: Alert mail formatting and the SMTP transport
//! ABOUTME: Builds failure notifications from job logs and sends them asynchronously

use async_trait::async_trait;
use chrono::Local;
use cw_core::time::{format_local_millis, LOCAL_TIME_FORMAT};
use cw_core::{Error, JobLog, Result};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Outbound alert channel.
#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// SMTP-backed alert sender.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: lettre::message::Mailbox,
}

impl SmtpMailer {
    pub fn new(host: &str, port: u16, username: &str, password: &str, from: &str) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| Error::Mail(format!("smtp relay setup failed: {}", e)))?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        let from = from
            .parse()
            .map_err(|e| Error::Mail(format!("invalid sender address '{}': {}", from, e)))?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl AlertSender for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to
                .parse()
                .map_err(|e| Error::Mail(format!("invalid recipient '{}': {}", to, e)))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| Error::Mail(format!("message build failed: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| Error::Mail(format!("smtp send failed: {}", e)))?;
        Ok(())
    }
}

/// Subject line for a failed execution.
pub fn alert_subject(log: &JobLog) -> String {
    format!(
        "{} {} failed",
        log.job_name,
        Local::now().format(LOCAL_TIME_FORMAT)
    )
}

/// Plain-text alert body listing the execution record.
pub fn alert_body(log: &JobLog) -> String {
    format!(
        "JobName: {}\r\n\
         Command: {}\r\n\
         Err: {}\r\n\
         Output: {}\r\n\
         PlanTime: {}\r\n\
         ScheduleTime: {}\r\n\
         StartTime: {}\r\n\
         EndTime: {}\r\n\
         LocalIP: {}",
        log.job_name,
        log.command,
        log.err,
        log.output,
        format_local_millis(log.plan_time),
        format_local_millis(log.schedule_time),
        format_local_millis(log.start_time),
        format_local_millis(log.end_time),
        log.local_ip,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> JobLog {
        JobLog {
            job_name: "hello".into(),
            command: "echo hi".into(),
            err: "command exited with status 1".into(),
            output: "boom".into(),
            plan_time: 1_714_561_800_000,
            schedule_time: 1_714_561_800_010,
            start_time: 1_714_561_800_020,
            end_time: 1_714_561_800_900,
            local_ip: "192.168.1.2".into(),
            email: "ops@example.com".into(),
        }
    }

    #[test]
    fn test_alert_subject_names_job() {
        let subject = alert_subject(&sample_log());
        assert!(subject.starts_with("hello "));
        assert!(subject.ends_with(" failed"));
    }

    #[test]
    fn test_alert_body_lists_record() {
        let body = alert_body(&sample_log());
        assert!(body.contains("JobName: hello"));
        assert!(body.contains("Command: echo hi"));
        assert!(body.contains("Err: command exited with status 1"));
        assert!(body.contains("LocalIP: 192.168.1.2"));
    }

    #[test]
    fn test_smtp_mailer_rejects_bad_sender() {
        let mailer = SmtpMailer::new("smtp.example.com", 465, "user", "pass", "not an address");
        assert!(mailer.is_err());
    }
}
