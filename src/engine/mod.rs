mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;
#[cfg(test)]
mod tests;

pub use conflict::now_ms;
pub use error::EngineError;
pub use mutations::{BookingForm, ReservationRequest};
pub use slots::{generate_slots, is_on_grid, BookingTally, Slots};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedServiceState = Arc<RwLock<ServiceState>>;
pub type SharedBusinessState = Arc<RwLock<BusinessState>>;

// ── Group-commit ledger channel ──────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the ledger file and batches appends.
/// Whatever is queued when the first append arrives shares one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't ride along with the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Reservation policy knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Status a fresh booking starts in.
    pub initial_status: BookingStatus,
    /// Longest a reservation waits for its service lock before giving up.
    pub lock_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            initial_status: BookingStatus::Pending,
            lock_timeout: Duration::from_secs(2),
        }
    }
}

/// The scheduling core: catalog, weekly rules and the booking ledger.
///
/// Each service's rules and bookings sit behind their own `RwLock`. Slot listing
/// takes the read side briefly; a reservation holds the write side from its
/// capacity re-count until the booking is durable and applied.
pub struct Engine {
    pub(super) owners: DashMap<Ulid, Owner>,
    pub(super) businesses: DashMap<Ulid, SharedBusinessState>,
    pub(super) services: DashMap<Ulid, SharedServiceState>,
    /// Owner id → ids of the businesses it owns.
    pub(super) owned_by: DashMap<Ulid, Vec<Ulid>>,
    /// Booking id → (service id, slot).
    pub(super) booking_index: DashMap<Ulid, (Ulid, SlotKey)>,
    /// Booking ids claimed by a reservation that has not committed yet.
    pub(super) reserving: DashMap<Ulid, ()>,
    /// Serializes catalog inserts (owners, businesses, services).
    pub(super) catalog_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) options: EngineOptions,
}

/// Apply a service-scoped event. Caller holds the service write lock.
fn apply_to_service(ss: &mut ServiceState, event: &Event, index: &DashMap<Ulid, (Ulid, SlotKey)>) {
    match event {
        Event::ServiceAvailabilitySet { availability } => {
            ss.rules[availability.day.index()] = Some(availability.clone());
        }
        Event::ServiceAvailabilityRemoved { day, .. } => {
            ss.rules[day.index()] = None;
        }
        Event::BookingCreated { booking } => {
            index.insert(booking.id, (booking.service_id, booking.key()));
            ss.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, key, status, .. } => {
            ss.set_status(key, *id, *status);
        }
        Event::EmailConfirmed { id, key, .. } => {
            if let Some(b) = ss.booking_mut(key, *id) {
                b.email_confirmed = true;
            }
        }
        Event::OwnerCreated { .. }
        | Event::BusinessCreated { .. }
        | Event::BusinessHoursSet { .. }
        | Event::ServiceCreated { .. } => {}
    }
}

/// Apply a business-scoped event. Caller holds the business write lock.
fn apply_to_business(bs: &mut BusinessState, event: &Event) {
    match event {
        Event::BusinessHoursSet { hours } => {
            bs.hours[hours.day.index()] = Some(hours.clone());
        }
        Event::ServiceCreated { service } => {
            if !bs.services.contains(&service.id) {
                bs.services.push(service.id);
            }
        }
        _ => {}
    }
}

fn event_service_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ServiceAvailabilitySet { availability } => Some(availability.service_id),
        Event::ServiceAvailabilityRemoved { service_id, .. }
        | Event::BookingStatusChanged { service_id, .. }
        | Event::EmailConfirmed { service_id, .. } => Some(*service_id),
        Event::BookingCreated { booking } => Some(booking.service_id),
        Event::OwnerCreated { .. }
        | Event::BusinessCreated { .. }
        | Event::BusinessHoursSet { .. }
        | Event::ServiceCreated { .. } => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, options: EngineOptions) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            owners: DashMap::new(),
            businesses: DashMap::new(),
            services: DashMap::new(),
            owned_by: DashMap::new(),
            booking_index: DashMap::new(),
            reserving: DashMap::new(),
            catalog_lock: Mutex::new(()),
            wal_tx,
            notify,
            options,
        };
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            events = events.len(),
            businesses = engine.businesses.len(),
            services = engine.services.len(),
            bookings = engine.booking_index.len(),
            "ledger replayed"
        );
        Ok(engine)
    }

    // Nobody else holds these Arcs during replay, so try_write always succeeds.
    // blocking_write would panic when the engine is built inside a runtime.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::OwnerCreated { owner } => {
                self.owners.insert(owner.id, owner.clone());
            }
            Event::BusinessCreated { business } => {
                self.owned_by.entry(business.owner_id).or_default().push(business.id);
                self.businesses
                    .insert(business.id, Arc::new(RwLock::new(BusinessState::new(business.clone()))));
            }
            Event::ServiceCreated { service } => {
                self.services
                    .insert(service.id, Arc::new(RwLock::new(ServiceState::new(service.clone()))));
                if let Some(bs) = self.get_business(&service.business_id) {
                    let mut guard = bs.try_write().expect("replay: uncontended write");
                    apply_to_business(&mut guard, event);
                }
            }
            Event::BusinessHoursSet { hours } => {
                if let Some(bs) = self.get_business(&hours.business_id) {
                    let mut guard = bs.try_write().expect("replay: uncontended write");
                    apply_to_business(&mut guard, event);
                }
            }
            other => {
                if let Some(service_id) = event_service_id(other)
                    && let Some(ss) = self.get_service(&service_id)
                {
                    let mut guard = ss.try_write().expect("replay: uncontended write");
                    apply_to_service(&mut guard, other, &self.booking_index);
                }
            }
        }
    }

    /// Hand an event to the group-commit writer and wait until it is durable.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("ledger writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("ledger writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) async fn persist_and_apply_service(&self, ss: &mut ServiceState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_service(ss, event, &self.booking_index);
        Ok(())
    }

    pub(super) async fn persist_and_apply_business(&self, bs: &mut BusinessState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_business(bs, event);
        Ok(())
    }

    pub fn get_service(&self, id: &Ulid) -> Option<SharedServiceState> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn get_business(&self, id: &Ulid) -> Option<SharedBusinessState> {
        self.businesses.get(id).map(|e| e.value().clone())
    }

    pub fn business_exists(&self, id: &Ulid) -> bool {
        self.businesses.contains_key(id)
    }

    /// Constant-time comparison of a presented key with the owner's stored key.
    pub fn verify_owner_key(&self, owner_id: &Ulid, presented: &str) -> bool {
        let Some(owner) = self.owners.get(owner_id) else {
            return false;
        };
        let (a, b) = (owner.api_key.as_bytes(), presented.as_bytes());
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }

    pub fn owner_api_key(&self, owner_id: &Ulid) -> Option<String> {
        self.owners.get(owner_id).map(|o| o.api_key.clone())
    }

    pub fn businesses_owned_by(&self, owner_id: &Ulid) -> Vec<Ulid> {
        self.owned_by.get(owner_id).map(|e| e.value().clone()).unwrap_or_default()
    }

    /// Fetch a service and check it belongs to `business_id`.
    pub(super) async fn service_of(&self, business_id: Ulid, service_id: Ulid) -> Result<SharedServiceState, EngineError> {
        let bs = self
            .get_business(&business_id)
            .ok_or(EngineError::NotFound("business", business_id))?;
        if !bs.read().await.services.contains(&service_id) {
            return Err(EngineError::NotFound("service", service_id));
        }
        self.get_service(&service_id)
            .ok_or(EngineError::NotFound("service", service_id))
    }

    /// Acquire a service write lock, giving up after the configured timeout.
    pub(super) async fn write_service_bounded(
        &self,
        ss: SharedServiceState,
        key: SlotKey,
    ) -> Result<OwnedRwLockWriteGuard<ServiceState>, EngineError> {
        tokio::time::timeout(self.options.lock_timeout, ss.write_owned())
            .await
            .map_err(|_| {
                metrics::counter!(crate::observability::RESERVE_LOCK_TIMEOUTS_TOTAL).increment(1);
                EngineError::SlotUnavailable {
                    key,
                    reason: "timed out waiting for the slot",
                }
            })
    }
}
