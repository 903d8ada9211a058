use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use crate::config::{Config, SMTPS_PORT};
use crate::error::Result;

/// A composed, transport-independent price alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEmail {
    pub subject: String,
    pub body: String,
}

/// Outbound alert delivery. `SmtpNotifier` in production, fakes in tests.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &AlertEmail) -> Result<()>;
}

/// Builds the alert for a price that reached the target.
pub fn compose_alert(cfg: &Config, price: f64, item_name: &str, at: DateTime<Local>) -> AlertEmail {
    let subject = format!("价格提醒: {item_name} 当前价格 ¥{price:.2}");
    let body = format!(
        "您好！\n\
         \n\
         您监控的 {item_name} 当前最低售价为: ¥{price:.2}\n\
         已达到您设置的目标价格: ¥{target:.2}\n\
         \n\
         立即购买: {link}\n\
         监控时间: {time}\n\
         \n\
         ---\n\
         Buff 价格监控 自动发送\n",
        target = cfg.target_price,
        link = cfg.buy_url(),
        time = at.format("%Y-%m-%d %H:%M:%S"),
    );
    AlertEmail { subject, body }
}

/// Sends alerts through an authenticated, encrypted SMTP session.
/// Port 465 uses implicit TLS, anything else STARTTLS.
pub struct SmtpNotifier {
    host: String,
    port: u16,
    credentials: Credentials,
    from: String,
    to: String,
    timeout: Duration,
}

impl SmtpNotifier {
    pub fn new(cfg: &Config) -> Self {
        Self {
            host: cfg.smtp_host.clone(),
            port: cfg.smtp_port,
            credentials: Credentials::new(cfg.smtp_user.clone(), cfg.smtp_password.clone()),
            from: cfg.smtp_from.clone(),
            to: cfg.notify_email.clone(),
            timeout: cfg.request_timeout,
        }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if self.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)?
        };
        Ok(builder
            .port(self.port)
            .credentials(self.credentials.clone())
            .timeout(Some(self.timeout))
            .build())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, email: &AlertEmail) -> Result<()> {
        let message = Message::builder()
            .from(self.from.parse::<Mailbox>()?)
            .to(self.to.parse::<Mailbox>()?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())?;

        let mailer = self.transport()?;
        let response = mailer.send(message).await?;
        debug!("[NOTIFY] relay {}:{} answered {}", self.host, self.port, response.code());
        Ok(())
    }
}
