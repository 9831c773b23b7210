use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::parse_date;
use super::slots::{generate_slots, BookingTally};
use super::{Engine, EngineError};

impl Engine {
    /// Candidate slots for one service over `[from, to]`, date then time ascending.
    ///
    /// Takes the service read lock only long enough to copy the rules and tally the
    /// bookings in range; the result may be stale by the time the caller reserves.
    pub async fn list_available_slots(
        &self,
        business_id: Ulid,
        service_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, EngineError> {
        if from > to {
            return Err(EngineError::validation(format!("date range {from}..{to} is reversed")));
        }
        if (to - from).num_days() >= MAX_SLOT_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("slot query range too wide"));
        }
        let ss = self.service_of(business_id, service_id).await?;
        let (service, rules, tally) = {
            let guard = ss.read().await;
            let tally = BookingTally::from_bookings(service_id, guard.bookings_between(from, to));
            (guard.service.clone(), guard.rules.clone(), tally)
        };
        Ok(generate_slots(&service, &rules, from, to, &tally).collect())
    }

    /// `list_available_slots` with the range still as `YYYY-MM-DD` text.
    pub async fn list_available_slots_between(
        &self,
        business_id: Ulid,
        service_id: Ulid,
        from: &str,
        to: &str,
    ) -> Result<Vec<Slot>, EngineError> {
        let from = parse_date("from", from)?;
        let to = parse_date("to", to)?;
        self.list_available_slots(business_id, service_id, from, to).await
    }

    pub async fn get_business_info(&self, business_id: Ulid) -> Result<BusinessInfo, EngineError> {
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound("business", business_id))?;
        let guard = bs.read().await;
        let weekly_hours = DayOfWeek::ALL
            .iter()
            .map(|&day| match &guard.hours[day.index()] {
                Some(h) if h.is_open => DayHours {
                    day,
                    is_open: true,
                    start: Some(h.start.to_string()),
                    end: Some(h.end.to_string()),
                },
                _ => DayHours {
                    day,
                    is_open: false,
                    start: None,
                    end: None,
                },
            })
            .collect();
        Ok(BusinessInfo {
            business: guard.business.clone(),
            services_count: guard.services.len(),
            weekly_hours,
        })
    }

    /// Weekday operating hours as stored; days without a row are absent.
    pub async fn business_hours(&self, business_id: Ulid) -> Result<Vec<BusinessHours>, EngineError> {
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound("business", business_id))?;
        let guard = bs.read().await;
        Ok(guard.hours.iter().flatten().cloned().collect())
    }

    /// Services of a business in creation order.
    pub async fn list_services(&self, business_id: Ulid) -> Result<Vec<Service>, EngineError> {
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound("business", business_id))?;
        let ids = bs.read().await.services.clone();
        let mut services = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ss) = self.get_service(&id) {
                services.push(ss.read().await.service.clone());
            }
        }
        Ok(services)
    }

    /// Weekday availability rows of one service, Monday first.
    pub async fn service_availability(
        &self,
        business_id: Ulid,
        service_id: Ulid,
    ) -> Result<Vec<ServiceAvailability>, EngineError> {
        let ss = self.service_of(business_id, service_id).await?;
        let guard = ss.read().await;
        Ok(guard.rules.iter().flatten().cloned().collect())
    }

    /// A booking, visible only to the business it belongs to.
    pub async fn get_booking(&self, business_id: Ulid, id: Ulid) -> Result<Booking, EngineError> {
        self.find_booking(id)
            .await
            .filter(|b| b.business_id == business_id)
            .ok_or(EngineError::NotFound("booking", id))
    }

    pub(crate) async fn find_booking(&self, id: Ulid) -> Option<Booking> {
        let (service_id, key) = self.booking_index.get(&id).map(|e| *e.value())?;
        let ss = self.get_service(&service_id)?;
        let guard = ss.read().await;
        guard.bookings.get(&key)?.iter().find(|b| b.id == id).cloned()
    }

    /// Active bookings still waiting for a primary notification, created within
    /// `window` before `now`, oldest first, at most `limit` of them.
    pub async fn unconfirmed_bookings(&self, now: Ms, window: Ms, limit: usize) -> Vec<Booking> {
        let cutoff = now.saturating_sub(window);
        let service_ids: Vec<Ulid> = self.services.iter().map(|e| *e.key()).collect();
        let mut pending = Vec::new();
        for id in service_ids {
            let Some(ss) = self.get_service(&id) else {
                continue;
            };
            let guard = ss.read().await;
            pending.extend(
                guard
                    .bookings
                    .values()
                    .flatten()
                    .filter(|b| b.status.is_active() && !b.email_confirmed && b.created_at >= cutoff)
                    .cloned(),
            );
        }
        pending.sort_by_key(|b| (b.created_at, b.id));
        pending.truncate(limit);
        pending
    }

    /// Everything a notification about `id` needs: the booking, its service, its business.
    pub async fn booking_context(&self, id: Ulid) -> Result<(Booking, Service, Business), EngineError> {
        let booking = self
            .find_booking(id)
            .await
            .ok_or(EngineError::NotFound("booking", id))?;
        let service = match self.get_service(&booking.service_id) {
            Some(ss) => ss.read().await.service.clone(),
            None => return Err(EngineError::NotFound("service", booking.service_id)),
        };
        let business = match self.get_business(&booking.business_id) {
            Some(bs) => bs.read().await.business.clone(),
            None => return Err(EngineError::NotFound("business", booking.business_id)),
        };
        Ok((booking, service, business))
    }
}

