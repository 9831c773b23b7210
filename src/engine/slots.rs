use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

// ── Slot generation ───────────────────────────────────────────────

/// Active booking counts per slot for one service.
#[derive(Debug, Clone, Default)]
pub struct BookingTally {
    counts: HashMap<SlotKey, u32>,
}

impl BookingTally {
    /// Count pending/confirmed bookings of `service_id`; everything else is ignored.
    pub fn from_bookings<'a>(service_id: Ulid, bookings: impl IntoIterator<Item = &'a Booking>) -> Self {
        let mut counts = HashMap::new();
        for b in bookings {
            if b.service_id == service_id && b.status.is_active() {
                *counts.entry(b.key()).or_insert(0) += 1;
            }
        }
        Self { counts }
    }

    pub fn count(&self, key: &SlotKey) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }
}

/// True if `time` is a start the generator emits for `rule`.
///
/// Mirrors `Slots::next` exactly: `start + k * (duration + break)` with the whole
/// slot inside the window.
pub fn is_on_grid(rule: &ServiceAvailability, service_duration: u16, time: ClockTime) -> bool {
    let duration = u32::from(rule.slot_duration(service_duration));
    if duration == 0 {
        return false;
    }
    let step = duration + u32::from(rule.break_between);
    let (start, end, t) = (
        u32::from(rule.start.minutes()),
        u32::from(rule.end.minutes()),
        u32::from(time.minutes()),
    );
    t >= start && (t - start) % step == 0 && t + duration <= end
}

/// Lazily enumerate candidate slots for `service` over `[from, to]`, date then time ascending.
///
/// Pure in its inputs: calling it again with the same rules and tally replays the
/// same sequence.
pub fn generate_slots<'a>(
    service: &'a Service,
    rules: &'a WeeklyRules,
    from: NaiveDate,
    to: NaiveDate,
    tally: &'a BookingTally,
) -> Slots<'a> {
    Slots {
        service,
        rules,
        tally,
        date: (from <= to).then_some(from),
        last: to,
        offset: None,
    }
}

#[derive(Debug, Clone)]
pub struct Slots<'a> {
    service: &'a Service,
    rules: &'a WeeklyRules,
    tally: &'a BookingTally,
    date: Option<NaiveDate>,
    last: NaiveDate,
    /// Next candidate start on `date`, in minutes. `None` before the first slot of a day.
    offset: Option<u32>,
}

impl Iterator for Slots<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        loop {
            let date = self.date?;
            if let Some(rule) = &self.rules[DayOfWeek::of(date).index()] {
                let duration = u32::from(rule.slot_duration(self.service.duration));
                let offset = self.offset.unwrap_or(u32::from(rule.start.minutes()));
                if duration > 0 && offset + duration <= u32::from(rule.end.minutes()) {
                    self.offset = Some(offset + duration + u32::from(rule.break_between));
                    // offset + duration <= end <= MINUTES_PER_DAY
                    let time = ClockTime::from_minutes(offset as u16)?;
                    let taken = self.tally.count(&SlotKey { date, time });
                    let remaining = rule.max_concurrent.saturating_sub(taken);
                    return Some(Slot {
                        date,
                        time,
                        available: remaining > 0,
                        remaining_capacity: remaining,
                    });
                }
            }
            self.offset = None;
            self.date = if date < self.last { date.succ_opt() } else { None };
        }
    }
}
