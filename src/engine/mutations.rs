use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{
    check_capacity, now_ms, parse_clock, parse_date, rule_for_slot, validate_availability,
    validate_customer, validate_email, validate_hours, validate_text,
};
use super::{Engine, EngineError, WalCommand};

/// A reservation with every field already parsed.
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub customer: Customer,
    pub date: NaiveDate,
    pub time: ClockTime,
    pub notes: Option<String>,
}

/// A booking id reserved for one in-flight reservation. Released on drop.
struct BookingIdClaim<'a> {
    engine: &'a Engine,
    id: Ulid,
}

impl Drop for BookingIdClaim<'_> {
    fn drop(&mut self) {
        self.engine.reserving.remove(&self.id);
    }
}

/// Reservation fields as they arrive from a client, date and time still text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingForm {
    pub id: Ulid,
    pub service_id: Ulid,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub notes: Option<String>,
}

impl BookingForm {
    pub fn into_request(self, business_id: Ulid) -> Result<ReservationRequest, EngineError> {
        let date = parse_date("booking_date", &self.date)?;
        let time = parse_clock("booking_time", &self.time)?;
        Ok(ReservationRequest {
            id: self.id,
            business_id,
            service_id: self.service_id,
            customer: Customer {
                name: self.customer_name,
                email: self.customer_email,
                phone: self.customer_phone,
            },
            date,
            time,
            notes: self.notes,
        })
    }
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn create_owner(&self, id: Ulid, api_key: String) -> Result<(), EngineError> {
        if api_key.len() < MIN_API_KEY_LEN {
            return Err(EngineError::validation(format!(
                "api key must be at least {MIN_API_KEY_LEN} characters"
            )));
        }
        if api_key.len() > MAX_API_KEY_LEN {
            return Err(EngineError::LimitExceeded("api key too long"));
        }
        let _catalog = self.catalog_lock.lock().await;
        if self.owners.len() >= MAX_OWNERS {
            return Err(EngineError::LimitExceeded("too many owners"));
        }
        if self.owners.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let owner = Owner { id, api_key };
        self.wal_append(&Event::OwnerCreated { owner: owner.clone() }).await?;
        self.owners.insert(id, owner);
        Ok(())
    }

    pub async fn create_business(&self, business: Business) -> Result<(), EngineError> {
        validate_text("name", &business.name, MAX_NAME_LEN)?;
        if let Some(email) = &business.contact_email {
            validate_email("contact_email", email)?;
        }
        let _catalog = self.catalog_lock.lock().await;
        if !self.owners.contains_key(&business.owner_id) {
            return Err(EngineError::NotFound("owner", business.owner_id));
        }
        if self.businesses.len() >= MAX_BUSINESSES {
            return Err(EngineError::LimitExceeded("too many businesses"));
        }
        if self.businesses.contains_key(&business.id) {
            return Err(EngineError::AlreadyExists(business.id));
        }
        self.wal_append(&Event::BusinessCreated { business: business.clone() }).await?;
        self.owned_by.entry(business.owner_id).or_default().push(business.id);
        self.businesses
            .insert(business.id, Arc::new(RwLock::new(BusinessState::new(business))));
        Ok(())
    }

    /// Upsert one weekday of a business's opening hours.
    pub async fn set_business_hours(&self, hours: BusinessHours) -> Result<(), EngineError> {
        validate_hours(&hours)?;
        let bs = self
            .get_business(&hours.business_id)
            .ok_or(EngineError::NotFound("business", hours.business_id))?;
        let mut guard = bs.write().await;
        self.persist_and_apply_business(&mut guard, &Event::BusinessHoursSet { hours }).await
    }

    pub async fn create_service(&self, service: Service) -> Result<(), EngineError> {
        validate_text("name", &service.name, MAX_NAME_LEN)?;
        validate_text("category", &service.category, MAX_CATEGORY_LEN)?;
        if service.duration == 0 || service.duration > MAX_SERVICE_DURATION_MIN {
            return Err(EngineError::validation(format!(
                "duration must be between 1 and {MAX_SERVICE_DURATION_MIN} minutes"
            )));
        }
        if service.price < 0 {
            return Err(EngineError::validation("price must not be negative"));
        }
        let _catalog = self.catalog_lock.lock().await;
        let bs = self
            .get_business(&service.business_id)
            .ok_or(EngineError::NotFound("business", service.business_id))?;
        if self.services.contains_key(&service.id) {
            return Err(EngineError::AlreadyExists(service.id));
        }
        let mut guard = bs.write().await;
        if guard.services.len() >= MAX_SERVICES_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many services on business"));
        }
        let event = Event::ServiceCreated { service: service.clone() };
        self.persist_and_apply_business(&mut guard, &event).await?;
        self.services
            .insert(service.id, Arc::new(RwLock::new(ServiceState::new(service))));
        Ok(())
    }

    /// Upsert the availability row for one service weekday.
    pub async fn set_service_availability(
        &self,
        business_id: Ulid,
        availability: ServiceAvailability,
    ) -> Result<(), EngineError> {
        validate_availability(&availability)?;
        let ss = self.service_of(business_id, availability.service_id).await?;
        let mut guard = ss.write().await;
        let event = Event::ServiceAvailabilitySet { availability };
        self.persist_and_apply_service(&mut guard, &event).await
    }

    /// Close a service for one weekday. Existing bookings on that day are kept.
    pub async fn remove_service_availability(
        &self,
        business_id: Ulid,
        service_id: Ulid,
        day: DayOfWeek,
    ) -> Result<(), EngineError> {
        let ss = self.service_of(business_id, service_id).await?;
        let mut guard = ss.write().await;
        if guard.rule_for(day).is_none() {
            return Err(EngineError::NotFound("availability", service_id));
        }
        let event = Event::ServiceAvailabilityRemoved { service_id, day };
        self.persist_and_apply_service(&mut guard, &event).await
    }

    // ── Reservations ─────────────────────────────────────────

    /// Parse a client booking form, then reserve.
    pub async fn create_booking(&self, business_id: Ulid, form: BookingForm) -> Result<Booking, EngineError> {
        let request = form.into_request(business_id)?;
        self.reserve(request).await
    }

    /// Commit a booking if its slot still has capacity.
    ///
    /// The capacity re-count, the ledger append, and the in-memory insert all run
    /// under the service write lock, so concurrent reservations for one slot are
    /// serialized and at most `max_concurrent` of them succeed.
    pub async fn reserve(&self, request: ReservationRequest) -> Result<Booking, EngineError> {
        let result = self.reserve_inner(request).await;
        let outcome = match &result {
            Ok(_) => "committed",
            Err(e) => e.kind(),
        };
        metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn reserve_inner(&self, request: ReservationRequest) -> Result<Booking, EngineError> {
        let ss = self.service_of(request.business_id, request.service_id).await?;
        validate_customer(&request.customer, request.notes.as_deref())?;
        // Held until the booking is in the index, so the id stays unique across services.
        let _claim = self.claim_booking_id(request.id)?;
        let key = SlotKey {
            date: request.date,
            time: request.time,
        };
        let mut guard = self.write_service_bounded(ss, key).await?;

        let rule = rule_for_slot(&guard, &key)?;
        check_capacity(&guard, &key, rule)?;

        let booking = Booking {
            id: request.id,
            business_id: request.business_id,
            service_id: request.service_id,
            customer: request.customer,
            date: request.date,
            time: request.time,
            status: self.options.initial_status,
            email_confirmed: false,
            notes: request.notes,
            created_at: now_ms(),
        };
        let event = Event::BookingCreated { booking: booking.clone() };
        self.persist_and_apply_service(&mut guard, &event).await?;
        drop(guard);

        tracing::debug!(
            booking = %booking.id,
            service = %booking.service_id,
            date = %booking.date,
            time = %booking.time,
            "booking committed"
        );
        self.notify.enqueue(booking.id);
        Ok(booking)
    }

    fn claim_booking_id(&self, id: Ulid) -> Result<BookingIdClaim<'_>, EngineError> {
        match self.reserving.entry(id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(());
                let claim = BookingIdClaim { engine: self, id };
                if self.booking_index.contains_key(&id) {
                    return Err(EngineError::AlreadyExists(id));
                }
                Ok(claim)
            }
        }
    }

    /// Move a booking along its lifecycle. Cancelling frees the slot immediately.
    pub async fn set_booking_status(
        &self,
        business_id: Ulid,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let (service_id, key) = self
            .booking_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound("booking", id))?;
        let ss = self
            .get_service(&service_id)
            .ok_or(EngineError::NotFound("booking", id))?;
        let mut guard = ss.write().await;
        let current = guard
            .booking_mut(&key, id)
            .filter(|b| b.business_id == business_id)
            .ok_or(EngineError::NotFound("booking", id))?
            .status;
        if !current.can_transition_to(status) {
            return Err(EngineError::validation(format!(
                "booking {id} cannot move from {} to {}",
                current.as_str(),
                status.as_str()
            )));
        }
        let event = Event::BookingStatusChanged {
            id,
            service_id,
            key,
            status,
        };
        self.persist_and_apply_service(&mut guard, &event).await?;
        guard
            .find_booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))
    }

    pub async fn cancel_booking(&self, business_id: Ulid, id: Ulid) -> Result<Booking, EngineError> {
        self.set_booking_status(business_id, id, BookingStatus::Cancelled).await
    }

    /// Record a successful primary notification. Returns false if it was already set.
    pub async fn mark_email_confirmed(&self, id: Ulid) -> Result<bool, EngineError> {
        let (service_id, key) = self
            .booking_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound("booking", id))?;
        let ss = self
            .get_service(&service_id)
            .ok_or(EngineError::NotFound("booking", id))?;
        let mut guard = ss.write().await;
        match guard.booking_mut(&key, id) {
            None => return Err(EngineError::NotFound("booking", id)),
            Some(b) if b.email_confirmed => return Ok(false),
            Some(_) => {}
        }
        let event = Event::EmailConfirmed { id, service_id, key };
        self.persist_and_apply_service(&mut guard, &event).await?;
        Ok(true)
    }

    // ── Ledger maintenance ───────────────────────────────────

    /// Rewrite the ledger as the minimal event set that rebuilds the current state.
    ///
    /// Holds the catalog lock and a read guard on every business and service until
    /// the writer has swapped files, so no mutation can land between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let mut events = Vec::new();

        let mut owners: Vec<Owner> = self.owners.iter().map(|e| e.value().clone()).collect();
        owners.sort_by_key(|o| o.id);
        events.extend(owners.into_iter().map(|owner| Event::OwnerCreated { owner }));

        let mut business_ids: Vec<Ulid> = self.businesses.iter().map(|e| *e.key()).collect();
        business_ids.sort();
        let mut business_guards = Vec::with_capacity(business_ids.len());
        for id in &business_ids {
            if let Some(bs) = self.get_business(id) {
                business_guards.push(bs.read_owned().await);
            }
        }
        for bs in &business_guards {
            events.push(Event::BusinessCreated { business: bs.business.clone() });
            events.extend(bs.hours.iter().flatten().map(|h| Event::BusinessHoursSet { hours: h.clone() }));
        }

        let mut service_ids: Vec<Ulid> = self.services.iter().map(|e| *e.key()).collect();
        service_ids.sort();
        let mut service_guards = Vec::with_capacity(service_ids.len());
        for id in &service_ids {
            if let Some(ss) = self.get_service(id) {
                service_guards.push(ss.read_owned().await);
            }
        }
        for ss in &service_guards {
            events.push(Event::ServiceCreated { service: ss.service.clone() });
            events.extend(
                ss.rules
                    .iter()
                    .flatten()
                    .map(|a| Event::ServiceAvailabilitySet { availability: a.clone() }),
            );
            // Final status is stored on the booking itself, so no transitions need replaying.
            events.extend(
                ss.bookings
                    .values()
                    .flatten()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("ledger writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("ledger writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
