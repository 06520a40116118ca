//! Fire-and-forget background jobs.
//!
//! Operations enqueue [`Job`]s on a [`Queue`] and carry on without waiting for them. A single
//! worker task drains the queue in order. A job which fails is logged and dropped.

use crate::{
    error::Error,
    mail::{format_date, Mail, Mailer, Template, TemplateContext},
    schema::{Courier, Delivery},
};
use async_std::{
    channel::{unbounded, Receiver, Sender},
    task::spawn,
};
use chrono::{FixedOffset, Utc};
use std::sync::Arc;

/// Work to be done in the background.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Job {
    /// Tell a courier about a delivery assigned to them.
    NewDeliveryMail { delivery: Delivery, courier: Courier },
    /// Tell a courier that one of their deliveries was canceled.
    CancellationDeliveryMail { delivery: Delivery, courier: Courier },
}

impl Job {
    /// A name identifying the kind of job, for logging.
    pub fn key(&self) -> &'static str {
        match self {
            Self::NewDeliveryMail { .. } => "NewDeliveryMail",
            Self::CancellationDeliveryMail { .. } => "CancellationDeliveryMail",
        }
    }

    /// The message this job sends, with dates rendered in `zone`.
    pub fn mail(&self, zone: &FixedOffset) -> Mail {
        let (delivery, courier, subject, template, date) = match self {
            Self::NewDeliveryMail { delivery, courier } => (
                delivery,
                courier,
                "Nova Encomenda",
                Template::NewDelivery,
                delivery.created_at,
            ),
            Self::CancellationDeliveryMail { delivery, courier } => (
                delivery,
                courier,
                "Encomenda Cancelada",
                Template::CancellationDelivery,
                delivery.canceled_at.unwrap_or_else(Utc::now),
            ),
        };
        Mail {
            to: Mail::address(&courier.name, &courier.email),
            subject: subject.into(),
            template,
            context: TemplateContext {
                deliveryman: courier.name.clone(),
                product: delivery.product.clone(),
                date: format_date(&date.with_timezone(zone)),
            },
        }
    }
}

/// The producing end of the job queue.
#[derive(Clone, Debug)]
pub struct Queue {
    sender: Sender<Job>,
}

impl Queue {
    /// Spawn a worker which sends mail through `mailer`, and return a handle for enqueueing jobs.
    pub fn start(mailer: Arc<dyn Mailer>, zone: FixedOffset) -> Self {
        let (sender, receiver) = unbounded();
        spawn(work(receiver, mailer, zone));
        Self { sender }
    }

    /// Enqueue a job without waiting for it to run.
    pub fn add(&self, job: Job) -> Result<(), Error> {
        tracing::debug!(key = job.key(), "enqueue job");
        self.sender.try_send(job).map_err(|err| Error::Queue {
            message: err.to_string(),
        })
    }
}

async fn work(jobs: Receiver<Job>, mailer: Arc<dyn Mailer>, zone: FixedOffset) {
    while let Ok(job) = jobs.recv().await {
        let key = job.key();
        match mailer.send(job.mail(&zone)).await {
            Ok(()) => tracing::info!(key, "job done"),
            Err(err) => tracing::error!(key, "job failed: {err:#}"),
        }
    }
    tracing::info!("job queue closed");
}
