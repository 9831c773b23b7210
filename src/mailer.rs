use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Booking, BookingStatus, Business, ClockTime, Service};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientRole {
    /// The customer who made the booking. Delivery to them confirms the booking's email.
    Customer,
    /// The business contact address, copied on every booking.
    Business,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub role: RecipientRole,
    pub name: String,
    pub email: String,
}

/// What a booking message says, independent of how it is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingNotice {
    pub booking_id: Ulid,
    pub business_name: String,
    pub service_name: String,
    pub duration: u16,
    pub date: NaiveDate,
    pub time: ClockTime,
    pub status: BookingStatus,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub notes: Option<String>,
}

impl BookingNotice {
    pub fn new(booking: &Booking, service: &Service, business: &Business) -> Self {
        Self {
            booking_id: booking.id,
            business_name: business.name.clone(),
            service_name: service.name.clone(),
            duration: service.duration,
            date: booking.date,
            time: booking.time,
            status: booking.status,
            customer_name: booking.customer.name.clone(),
            customer_email: booking.customer.email.clone(),
            customer_phone: booking.customer.phone.clone(),
            notes: booking.notes.clone(),
        }
    }

    pub fn customer(&self) -> Recipient {
        Recipient {
            role: RecipientRole::Customer,
            name: self.customer_name.clone(),
            email: self.customer_email.clone(),
        }
    }

    pub fn business_contact(&self, business: &Business) -> Option<Recipient> {
        business.contact_email.as_ref().map(|email| Recipient {
            role: RecipientRole::Business,
            name: business.name.clone(),
            email: email.clone(),
        })
    }
}

/// Delivery failed upstream. Never surfaced as a reservation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailError(pub String);

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mail delivery failed: {}", self.0)
    }
}

impl std::error::Error for MailError {}

/// Outbound email collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &Recipient, notice: &BookingNotice) -> Result<(), MailError>;
}

/// Writes each message to the log instead of sending it.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &Recipient, notice: &BookingNotice) -> Result<(), MailError> {
        tracing::info!(
            booking = %notice.booking_id,
            to = %to.email,
            role = ?to.role,
            service = %notice.service_name,
            date = %notice.date,
            time = %notice.time,
            "booking notice"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// Records every send; fails customer sends while `failing` is set.
    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        pub sent: Mutex<Vec<(RecipientRole, Ulid)>>,
        pub failing: AtomicBool,
    }

    impl RecordingMailer {
        pub(crate) fn failing() -> Self {
            let m = Self::default();
            m.failing.store(true, Ordering::SeqCst);
            m
        }

        pub(crate) fn sends_to(&self, role: RecipientRole) -> usize {
            self.sent.lock().unwrap().iter().filter(|(r, _)| *r == role).count()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &Recipient, notice: &BookingNotice) -> Result<(), MailError> {
            if to.role == RecipientRole::Customer && self.failing.load(Ordering::SeqCst) {
                return Err(MailError("smtp unreachable".into()));
            }
            self.sent.lock().unwrap().push((to.role, notice.booking_id));
            Ok(())
        }
    }
}
