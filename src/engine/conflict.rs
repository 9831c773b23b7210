use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::slots::is_on_grid;
use super::EngineError;

/// Strict `YYYY-MM-DD`.
pub(crate) fn parse_date(field: &str, value: &str) -> Result<NaiveDate, EngineError> {
    let well_formed = value.len() == 10 && value.as_bytes()[4] == b'-' && value.as_bytes()[7] == b'-';
    well_formed
        .then(|| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
        .flatten()
        .ok_or_else(|| EngineError::validation(format!("{field}: malformed date {value:?} (expected YYYY-MM-DD)")))
}

pub(crate) fn parse_clock(field: &str, value: &str) -> Result<ClockTime, EngineError> {
    value
        .parse()
        .map_err(|e: ClockTimeError| EngineError::validation(format!("{field}: {e}")))
}

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Resolve the weekday rule for `key`, rejecting closed days and off-grid times.
///
/// Off-grid is always a validation error, never `SlotUnavailable`: a caller who
/// asks for 11:01 on a 60-minute grid must re-read the slot list, not retry.
pub(crate) fn rule_for_slot<'a>(ss: &'a ServiceState, key: &SlotKey) -> Result<&'a ServiceAvailability, EngineError> {
    let day = DayOfWeek::of(key.date);
    let rule = ss.rule_for(day).ok_or_else(|| {
        EngineError::validation(format!("service {} is not offered on {day}", ss.service.id))
    })?;
    if !is_on_grid(rule, ss.service.duration, key.time) {
        return Err(EngineError::validation(format!(
            "{} {} is not a slot boundary for service {}",
            key.date, key.time, ss.service.id
        )));
    }
    Ok(rule)
}

/// Capacity check; caller holds the service write lock.
pub(crate) fn check_capacity(ss: &ServiceState, key: &SlotKey, rule: &ServiceAvailability) -> Result<(), EngineError> {
    if ss.active_count(key) >= rule.max_concurrent {
        return Err(EngineError::SlotUnavailable {
            key: *key,
            reason: "fully booked",
        });
    }
    if ss.active_total() >= MAX_ACTIVE_BOOKINGS_PER_SERVICE {
        return Err(EngineError::LimitExceeded("too many active bookings on service"));
    }
    Ok(())
}

pub(crate) fn validate_text(field: &str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::validation(format!("{field} is required")));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded(match field {
            "customer_name" | "name" => "name too long",
            "category" => "category too long",
            "customer_phone" => "phone too long",
            _ => "field too long",
        }));
    }
    Ok(())
}

pub(crate) fn validate_email(field: &str, value: &str) -> Result<(), EngineError> {
    validate_text(field, value, MAX_EMAIL_LEN)?;
    let mut parts = value.splitn(2, '@');
    let (local, domain) = (parts.next().unwrap_or(""), parts.next().unwrap_or(""));
    if local.is_empty() || domain.is_empty() || domain.contains('@') || value.contains(char::is_whitespace) {
        return Err(EngineError::validation(format!("{field} is not an email address")));
    }
    Ok(())
}

pub(crate) fn validate_customer(customer: &Customer, notes: Option<&str>) -> Result<(), EngineError> {
    validate_text("customer_name", &customer.name, MAX_NAME_LEN)?;
    validate_email("customer_email", &customer.email)?;
    validate_text("customer_phone", &customer.phone, MAX_PHONE_LEN)?;
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

pub(crate) fn validate_availability(rule: &ServiceAvailability) -> Result<(), EngineError> {
    if rule.start >= rule.end {
        return Err(EngineError::validation(format!(
            "{}: start {} must be before end {}",
            rule.day, rule.start, rule.end
        )));
    }
    if rule.max_concurrent == 0 {
        return Err(EngineError::validation("max_concurrent must be at least 1"));
    }
    if rule
        .duration_override
        .is_some_and(|d| d == 0 || d > MAX_SERVICE_DURATION_MIN)
    {
        return Err(EngineError::validation("duration override out of range"));
    }
    Ok(())
}

pub(crate) fn validate_hours(hours: &BusinessHours) -> Result<(), EngineError> {
    if hours.is_open && hours.start >= hours.end {
        return Err(EngineError::validation(format!(
            "{}: open from {} must be before {}",
            hours.day, hours.start, hours.end
        )));
    }
    Ok(())
}
