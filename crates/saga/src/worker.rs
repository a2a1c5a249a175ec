//! Consumes bus messages and dispatches them to the saga handlers.

use std::sync::{Arc, PoisonError, RwLock};

use booking_store::BookingStore;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::continuation::{HandlerOutcome, PaymentOutcomeHandler};
use crate::error::{Result, SagaError};
use crate::messages::BookingMessage;
use crate::seeder::EventSeatSeeder;
use crate::settings::RetryPolicy;

/// A message given up on after its handler kept failing.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: BookingMessage,
    pub error: String,
    pub attempts: u32,
}

/// Final result of delivering one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The handler returned successfully.
    Handled { attempts: u32 },

    /// The message was moved to the dead-letter list.
    DeadLettered { attempts: u32 },
}

/// Message consumer with retry and dead-lettering.
///
/// Transient failures are retried with exponential backoff up to
/// `max_attempts`; any other failure dead-letters the message at once.
pub struct MessageWorker<S: BookingStore> {
    payments: PaymentOutcomeHandler<S>,
    seeder: EventSeatSeeder<S>,
    retry: RetryPolicy,
    dead_letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl<S> MessageWorker<S>
where
    S: BookingStore + Clone + 'static,
{
    /// Creates a worker whose handlers share `store`.
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self {
            payments: PaymentOutcomeHandler::new(store.clone()),
            seeder: EventSeatSeeder::new(store),
            retry,
            dead_letters: Arc::default(),
        }
    }

    /// Returns the messages that could not be handled.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Handles one message once, without retrying.
    pub async fn handle(&self, message: &BookingMessage) -> Result<()> {
        match message {
            BookingMessage::EventApproved(msg) => {
                self.seeder.on_event_approved(msg).await?;
            }
            BookingMessage::PaymentSucceeded(msg) => {
                let outcome = self.payments.on_payment_succeeded(msg).await?;
                log_outcome(message, outcome);
            }
            BookingMessage::PaymentFailed(msg) => {
                let outcome = self.payments.on_payment_failed(msg).await?;
                log_outcome(message, outcome);
            }
            BookingMessage::PaymentRequested(msg) => {
                tracing::debug!(booking_id = %msg.booking_id, "payment request left for the payment service");
            }
        }
        Ok(())
    }

    /// Handles one message, retrying transient failures.
    #[tracing::instrument(skip(self, message), fields(message_type = message.message_type(), booking_id = ?message.booking_id()))]
    pub async fn deliver(&self, message: BookingMessage) -> Delivery {
        let mut attempt = 1;
        loop {
            match self.handle(&message).await {
                Ok(()) => return Delivery::Handled { attempts: attempt },
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff_after(attempt);
                    tracing::warn!(attempt, ?delay, error = %e, "handler failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.dead_letter(message, &e, attempt);
                    return Delivery::DeadLettered { attempts: attempt };
                }
            }
        }
    }

    /// Consumes `receiver` until it closes, one task per message.
    ///
    /// Returns after every in-flight message has been delivered.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<BookingMessage>) {
        let mut in_flight = JoinSet::new();

        while let Some(message) = receiver.recv().await {
            let worker = Arc::clone(&self);
            in_flight.spawn(async move { worker.deliver(message).await });
            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
        tracing::info!("message worker stopped");
    }

    fn dead_letter(&self, message: BookingMessage, error: &SagaError, attempts: u32) {
        tracing::error!(attempts, error = %error, "message moved to dead letters");
        self.dead_letters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DeadLetter {
                message,
                error: error.to_string(),
                attempts,
            });
    }
}

fn log_outcome(message: &BookingMessage, outcome: HandlerOutcome) {
    match outcome {
        HandlerOutcome::Applied => {}
        HandlerOutcome::Duplicate => {
            tracing::debug!(message_type = message.message_type(), "duplicate delivery ignored")
        }
        HandlerOutcome::BookingNotFound | HandlerOutcome::Anomalous => tracing::warn!(
            message_type = message.message_type(),
            ?outcome,
            "message not applied"
        ),
    }
}
