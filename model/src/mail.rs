//! Transactional email to couriers.

use anyhow::{bail, Error};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Timelike};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use strum::Display;
use surf::Url;

/// Mail delivery options.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// URL of an HTTP mail relay which accepts messages as JSON.
    ///
    /// If not given, messages are written to the log instead of being sent.
    #[clap(long, env = "COURIER_MAIL_ENDPOINT")]
    pub mail_endpoint: Option<Url>,

    /// Sender of outgoing messages.
    #[clap(
        long,
        env = "COURIER_MAIL_FROM",
        default_value = "Equipe FastFeet <noreply@fastfeet.com>"
    )]
    pub mail_from: String,
}

impl Options {
    pub fn mailer(&self) -> Arc<dyn Mailer> {
        match &self.mail_endpoint {
            Some(endpoint) => Arc::new(HttpMailer::new(endpoint.clone(), &self.mail_from)),
            None => Arc::new(LogMailer),
        }
    }
}

/// The templates a relay renders messages with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Template {
    NewDelivery,
    CancellationDelivery,
}

/// Values substituted into a template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateContext {
    pub deliveryman: String,
    pub product: String,
    pub date: String,
}

/// A message to a courier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Mail {
    /// The recipient, as `Name <address>`.
    pub to: String,
    pub subject: String,
    pub template: Template,
    pub context: TemplateContext,
}

impl Mail {
    pub fn address(name: &str, email: &str) -> String {
        format!("{name} <{email}>")
    }
}

const MONTHS: [&str; 12] = [
    "janeiro",
    "fevereiro",
    "março",
    "abril",
    "maio",
    "junho",
    "julho",
    "agosto",
    "setembro",
    "outubro",
    "novembro",
    "dezembro",
];

/// Render a date the way it appears in messages, e.g. `05 de março, às 9:07h`.
pub fn format_date<Tz: TimeZone>(date: &DateTime<Tz>) -> String {
    format!(
        "{:02} de {}, às {}:{:02}h",
        date.day(),
        MONTHS[date.month0() as usize],
        date.hour(),
        date.minute()
    )
}

/// A way of delivering mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<(), Error>;
}

/// A mailer which only writes messages to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: Mail) -> Result<(), Error> {
        tracing::info!(
            to = %mail.to,
            subject = %mail.subject,
            template = %mail.template,
            product = %mail.context.product,
            date = %mail.context.date,
            "mail"
        );
        Ok(())
    }
}

/// A mailer which posts messages to an HTTP relay.
#[derive(Clone, Debug)]
pub struct HttpMailer {
    endpoint: Url,
    from: String,
}

#[derive(Serialize)]
struct Envelope<'a> {
    from: &'a str,
    #[serde(flatten)]
    mail: &'a Mail,
}

impl HttpMailer {
    pub fn new(endpoint: Url, from: &str) -> Self {
        Self {
            endpoint,
            from: from.into(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, mail: Mail) -> Result<(), Error> {
        let envelope = Envelope {
            from: &self.from,
            mail: &mail,
        };
        let res = surf::post(self.endpoint.clone())
            .body_json(&envelope)
            .map_err(surf::Error::into_inner)?
            .await
            .map_err(surf::Error::into_inner)?;
        if !res.status().is_success() {
            bail!("mail relay responded {}", res.status());
        }
        tracing::info!(to = %mail.to, subject = %mail.subject, "mail sent");
        Ok(())
    }
}

#[cfg(any(test, feature = "mocks"))]
pub use mock::MockMailer;

#[cfg(any(test, feature = "mocks"))]
mod mock {
    use super::*;
    use async_std::{sync::Mutex, task::sleep};
    use std::time::Duration;

    /// A mailer which records messages instead of sending them.
    #[derive(Clone, Debug, Default)]
    pub struct MockMailer {
        sent: Arc<Mutex<Vec<Mail>>>,
    }

    impl MockMailer {
        /// Messages sent so far.
        pub async fn sent(&self) -> Vec<Mail> {
            self.sent.lock().await.clone()
        }

        /// Wait until at least `count` messages have been sent, and return them.
        ///
        /// Jobs are processed in the background, so callers cannot observe their effects directly.
        pub async fn wait_for(&self, count: usize) -> Vec<Mail> {
            for _ in 0..100 {
                let sent = self.sent().await;
                if sent.len() >= count {
                    return sent;
                }
                sleep(Duration::from_millis(20)).await;
            }
            panic!("timed out waiting for {count} messages");
        }
    }

    #[async_trait]
    impl Mailer for MockMailer {
        async fn send(&self, mail: Mail) -> Result<(), Error> {
            self.sent.lock().await.push(mail);
            Ok(())
        }
    }
}
