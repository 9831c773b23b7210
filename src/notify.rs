use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::mailer::{BookingNotice, MailError, Mailer};
use crate::observability;

/// Bounded queue of booking ids awaiting their first notification, plus the set
/// of ids whose delivery is currently running.
pub struct NotifyHub {
    tx: mpsc::Sender<Ulid>,
    rx: Mutex<Option<mpsc::Receiver<Ulid>>>,
    in_flight: DashMap<Ulid, ()>,
}

impl NotifyHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            in_flight: DashMap::new(),
        }
    }

    /// Queue a booking for notification. Never blocks and never fails the caller;
    /// a full queue drops the request and leaves it to the retry sweep.
    pub fn enqueue(&self, booking_id: Ulid) {
        match self.tx.try_send(booking_id) {
            Ok(()) => {
                metrics::counter!(observability::NOTIFY_ENQUEUED_TOTAL).increment(1);
            }
            Err(TrySendError::Full(_)) => {
                warn!(booking = %booking_id, "notify queue full, leaving booking to the sweep");
                metrics::counter!(observability::NOTIFY_DROPPED_TOTAL, "reason" => "full").increment(1);
            }
            Err(TrySendError::Closed(_)) => {
                warn!(booking = %booking_id, "notify queue closed, leaving booking to the sweep");
                metrics::counter!(observability::NOTIFY_DROPPED_TOTAL, "reason" => "closed").increment(1);
            }
        }
    }

    /// The receiving end, handed out once to the dispatcher.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Ulid>> {
        self.rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Mark a delivery as running. `None` if another task already holds it.
    pub fn claim(&self, booking_id: Ulid) -> Option<Claim<'_>> {
        match self.in_flight.entry(booking_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Claim { hub: self, booking_id })
            }
        }
    }
}

/// Released on drop.
pub struct Claim<'a> {
    hub: &'a NotifyHub,
    booking_id: Ulid,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.hub.in_flight.remove(&self.booking_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Primary recipient accepted the message; the booking is now confirmed.
    Sent,
    AlreadyConfirmed,
    /// Another task is delivering this booking right now.
    InFlight,
}

#[derive(Debug)]
pub enum NotifyError {
    Mail(MailError),
    Engine(EngineError),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Mail(e) => write!(f, "{e}"),
            NotifyError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for NotifyError {}

impl From<EngineError> for NotifyError {
    fn from(e: EngineError) -> Self {
        NotifyError::Engine(e)
    }
}

/// Send the booking's messages and set `email_confirmed` once the customer's
/// message is accepted. A failed business copy is logged and does not block confirmation.
pub async fn deliver_booking(engine: &Engine, mailer: &dyn Mailer, booking_id: Ulid) -> Result<Delivery, NotifyError> {
    let Some(_claim) = engine.notify.claim(booking_id) else {
        return Ok(Delivery::InFlight);
    };
    let (booking, service, business) = engine.booking_context(booking_id).await?;
    if booking.email_confirmed {
        return Ok(Delivery::AlreadyConfirmed);
    }
    let notice = BookingNotice::new(&booking, &service, &business);

    if let Err(e) = mailer.send(&notice.customer(), &notice).await {
        metrics::counter!(observability::NOTIFY_DELIVERIES_TOTAL, "outcome" => "failed").increment(1);
        return Err(NotifyError::Mail(e));
    }
    if let Some(contact) = notice.business_contact(&business)
        && let Err(e) = mailer.send(&contact, &notice).await
    {
        warn!(booking = %booking_id, to = %contact.email, "business copy not delivered: {e}");
    }

    engine.mark_email_confirmed(booking_id).await?;
    metrics::counter!(observability::NOTIFY_DELIVERIES_TOTAL, "outcome" => "sent").increment(1);
    Ok(Delivery::Sent)
}

/// Drain the notify queue until every sender is gone.
pub async fn run_dispatcher(engine: Arc<Engine>, mailer: Arc<dyn Mailer>, mut rx: mpsc::Receiver<Ulid>) {
    while let Some(booking_id) = rx.recv().await {
        match deliver_booking(&engine, mailer.as_ref(), booking_id).await {
            Ok(Delivery::Sent) => debug!(booking = %booking_id, "booking notice delivered"),
            Ok(skip) => debug!(booking = %booking_id, "dispatch skipped: {skip:?}"),
            Err(e) => warn!(booking = %booking_id, "dispatch failed, sweep will retry: {e}"),
        }
    }
}
