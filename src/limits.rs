use crate::model::Ms;

pub const MAX_OWNERS: usize = 10_000;
pub const MAX_BUSINESSES: usize = 10_000;
pub const MAX_SERVICES_PER_BUSINESS: usize = 500;
pub const MAX_ACTIVE_BOOKINGS_PER_SERVICE: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CATEGORY_LEN: usize = 128;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_API_KEY_LEN: usize = 512;
pub const MIN_API_KEY_LEN: usize = 16;

/// Widest date range a single slot listing may cover, inclusive.
pub const MAX_SLOT_QUERY_DAYS: i64 = 92;

/// Longest bookable service, in minutes.
pub const MAX_SERVICE_DURATION_MIN: u16 = 24 * 60;

/// Unconfirmed bookings older than this are left alone by the retry sweep.
pub const SWEEP_WINDOW_MS: Ms = 7 * 24 * 3_600_000;

/// Bookings re-attempted per sweep run.
pub const SWEEP_BATCH_SIZE: usize = 50;
