use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for creation stamps and the sweep window.
pub type Ms = i64;

// ── Time of day ──────────────────────────────────────────────────

/// Minutes since midnight. Rendered as `HH:MM`; `24:00` is accepted as an end of day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClockTime(u16);

pub const MINUTES_PER_DAY: u16 = 24 * 60;

impl ClockTime {
    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes <= MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn hm(hour: u16, minute: u16) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        Self::from_minutes(hour.checked_mul(60)?.checked_add(minute)?)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockTimeError(pub String);

impl fmt::Display for ClockTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed time {:?} (expected HH:MM)", self.0)
    }
}

impl std::error::Error for ClockTimeError {}

impl FromStr for ClockTime {
    type Err = ClockTimeError;

    /// Strict `HH:MM`, optionally followed by `:00` seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ClockTimeError(s.to_string());
        let mut parts = s.split(':');
        let (Some(h), Some(m)) = (parts.next(), parts.next()) else {
            return Err(err());
        };
        if let Some(sec) = parts.next()
            && sec != "00"
        {
            return Err(err());
        }
        if parts.next().is_some() {
            return Err(err());
        }
        let two_digits = |p: &str| p.len() == 2 && p.bytes().all(|b| b.is_ascii_digit());
        if !two_digits(h) || !two_digits(m) {
            return Err(err());
        }
        let hour: u16 = h.parse().map_err(|_| err())?;
        let minute: u16 = m.parse().map_err(|_| err())?;
        if hour == 24 && minute != 0 {
            return Err(err());
        }
        ClockTime::hm(hour, minute).ok_or_else(err)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Half-open minute range `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u16,
    pub end: u16,
}

impl Span {
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Weekdays ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Mon,
        DayOfWeek::Tue,
        DayOfWeek::Wed,
        DayOfWeek::Thu,
        DayOfWeek::Fri,
        DayOfWeek::Sat,
        DayOfWeek::Sun,
    ];

    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Mon => DayOfWeek::Mon,
            Weekday::Tue => DayOfWeek::Tue,
            Weekday::Wed => DayOfWeek::Wed,
            Weekday::Thu => DayOfWeek::Thu,
            Weekday::Fri => DayOfWeek::Fri,
            Weekday::Sat => DayOfWeek::Sat,
            Weekday::Sun => DayOfWeek::Sun,
        }
    }

    /// Position in `ALL`, Monday first.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayOfWeek::Mon => "mon",
            DayOfWeek::Tue => "tue",
            DayOfWeek::Wed => "wed",
            DayOfWeek::Thu => "thu",
            DayOfWeek::Fri => "fri",
            DayOfWeek::Sat => "sat",
            DayOfWeek::Sun => "sun",
        }
    }
}

impl FromStr for DayOfWeek {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mon" | "monday" => Ok(DayOfWeek::Mon),
            "tue" | "tuesday" => Ok(DayOfWeek::Tue),
            "wed" | "wednesday" => Ok(DayOfWeek::Wed),
            "thu" | "thursday" => Ok(DayOfWeek::Thu),
            "fri" | "friday" => Ok(DayOfWeek::Fri),
            "sat" | "saturday" => Ok(DayOfWeek::Sat),
            "sun" | "sunday" => Ok(DayOfWeek::Sun),
            _ => Err(format!("unknown day of week: {s}")),
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Rules ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub business_id: Ulid,
    pub day: DayOfWeek,
    pub is_open: bool,
    pub start: ClockTime,
    pub end: ClockTime,
}

/// Per-service, per-weekday generation window and concurrency ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAvailability {
    pub service_id: Ulid,
    pub day: DayOfWeek,
    pub start: ClockTime,
    pub end: ClockTime,
    /// Minutes between the end of one slot and the start of the next.
    pub break_between: u16,
    pub max_concurrent: u32,
    /// Slot width for this weekday; falls back to the service duration.
    pub duration_override: Option<u16>,
}

impl ServiceAvailability {
    pub fn slot_duration(&self, service_duration: u16) -> u16 {
        self.duration_override.unwrap_or(service_duration)
    }
}

/// The seven availability rows of one service, indexed by `DayOfWeek::index`.
pub type WeeklyRules = [Option<ServiceAvailability>; 7];

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: Ulid,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub contact_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    /// Minutes; always > 0 for services accepted by the engine.
    pub duration: u16,
    /// Opaque minor units; never interpreted here.
    pub price: i64,
    pub category: String,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Pending and confirmed bookings hold capacity.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            _ => Err(format!("unknown booking status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Identifies one bookable slot of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub time: ClockTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub customer: Customer,
    pub date: NaiveDate,
    pub time: ClockTime,
    pub status: BookingStatus,
    pub email_confirmed: bool,
    pub notes: Option<String>,
    pub created_at: Ms,
}

impl Booking {
    pub fn key(&self) -> SlotKey {
        SlotKey {
            date: self.date,
            time: self.time,
        }
    }
}

/// A candidate appointment start, with its capacity at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: ClockTime,
    pub available: bool,
    pub remaining_capacity: u32,
}

// ── Live state ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BusinessState {
    pub business: Business,
    /// Indexed by `DayOfWeek::index`.
    pub hours: [Option<BusinessHours>; 7],
    pub services: Vec<Ulid>,
}

impl BusinessState {
    pub fn new(business: Business) -> Self {
        Self {
            business,
            hours: Default::default(),
            services: Vec::new(),
        }
    }
}

/// Everything the slot generator and the reservation check need for one service.
#[derive(Debug, Clone)]
pub struct ServiceState {
    pub service: Service,
    pub rules: WeeklyRules,
    /// All bookings ever made for this service, grouped by slot.
    pub bookings: BTreeMap<SlotKey, Vec<Booking>>,
    /// Bookings across all slots still holding capacity.
    active: usize,
}

impl ServiceState {
    pub fn new(service: Service) -> Self {
        Self {
            service,
            rules: Default::default(),
            bookings: BTreeMap::new(),
            active: 0,
        }
    }

    pub fn rule_for(&self, day: DayOfWeek) -> Option<&ServiceAvailability> {
        self.rules[day.index()].as_ref()
    }

    /// Bookings at `key` still holding capacity.
    pub fn active_count(&self, key: &SlotKey) -> u32 {
        self.bookings
            .get(key)
            .map_or(0, |v| v.iter().filter(|b| b.status.is_active()).count() as u32)
    }

    pub fn active_total(&self) -> usize {
        self.active
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        if booking.status.is_active() {
            self.active += 1;
        }
        self.bookings.entry(booking.key()).or_default().push(booking);
    }

    /// Returns false if no booking `id` sits at `key`.
    pub fn set_status(&mut self, key: &SlotKey, id: Ulid, status: BookingStatus) -> bool {
        let Some(booking) = self
            .bookings
            .get_mut(key)
            .and_then(|v| v.iter_mut().find(|b| b.id == id))
        else {
            return false;
        };
        match (booking.status.is_active(), status.is_active()) {
            (true, false) => self.active -= 1,
            (false, true) => self.active += 1,
            _ => {}
        }
        booking.status = status;
        true
    }

    pub fn booking_mut(&mut self, key: &SlotKey, id: Ulid) -> Option<&mut Booking> {
        self.bookings.get_mut(key)?.iter_mut().find(|b| b.id == id)
    }

    pub fn find_booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.values().flatten().find(|b| b.id == id)
    }

    /// Bookings whose date lies in `[from, to]`, in slot order.
    pub fn bookings_between(&self, from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = &Booking> {
        let lo = SlotKey { date: from, time: ClockTime(0) };
        let hi = SlotKey { date: to, time: ClockTime(MINUTES_PER_DAY) };
        self.bookings.range(lo..=hi).flat_map(|(_, v)| v.iter())
    }
}

// ── Ledger events ────────────────────────────────────────────────

/// Flat ledger record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OwnerCreated {
        owner: Owner,
    },
    BusinessCreated {
        business: Business,
    },
    BusinessHoursSet {
        hours: BusinessHours,
    },
    ServiceCreated {
        service: Service,
    },
    ServiceAvailabilitySet {
        availability: ServiceAvailability,
    },
    ServiceAvailabilityRemoved {
        service_id: Ulid,
        day: DayOfWeek,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        service_id: Ulid,
        key: SlotKey,
        status: BookingStatus,
    },
    EmailConfirmed {
        id: Ulid,
        service_id: Ulid,
        key: SlotKey,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayHours {
    pub day: DayOfWeek,
    pub is_open: bool,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessInfo {
    pub business: Business,
    pub services_count: usize,
    /// Always seven entries, Monday first; days without a row are closed.
    pub weekly_hours: Vec<DayHours>,
}
