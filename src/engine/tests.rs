use super::*;
use crate::limits::*;
use chrono::NaiveDate;
use tokio_test::assert_ok;

const DAY: Ms = 24 * 3_600_000;
const KEY: &str = "owner-api-key-0123456789";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotline_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

// 2026-10-19 is a Monday; no test service has a Tuesday rule.
fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

fn tuesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
}

fn t(s: &str) -> ClockTime {
    s.parse().unwrap()
}

struct Fixture {
    engine: Engine,
    business: Ulid,
    service: Ulid,
}

fn new_engine(path: PathBuf, options: EngineOptions) -> Engine {
    Engine::new(path, Arc::new(NotifyHub::new(64)), options).unwrap()
}

/// Owner, business and one 60-minute service open Mondays 09:00-12:00.
async fn fixture(name: &str, break_between: u16, max_concurrent: u32) -> Fixture {
    fixture_with(name, break_between, max_concurrent, EngineOptions::default()).await
}

async fn fixture_with(name: &str, break_between: u16, max_concurrent: u32, options: EngineOptions) -> Fixture {
    let engine = new_engine(test_wal_path(name), options);
    let (owner, business, service) = (Ulid::new(), Ulid::new(), Ulid::new());
    engine.create_owner(owner, KEY.into()).await.unwrap();
    engine
        .create_business(Business {
            id: business,
            owner_id: owner,
            name: "Northside Barbers".into(),
            contact_email: Some("desk@northside.test".into()),
        })
        .await
        .unwrap();
    engine
        .create_service(Service {
            id: service,
            business_id: business,
            name: "Haircut".into(),
            duration: 60,
            price: 3000,
            category: "hair".into(),
        })
        .await
        .unwrap();
    engine
        .set_service_availability(business, monday_rule(service, break_between, max_concurrent))
        .await
        .unwrap();
    Fixture {
        engine,
        business,
        service,
    }
}

fn monday_rule(service_id: Ulid, break_between: u16, max_concurrent: u32) -> ServiceAvailability {
    ServiceAvailability {
        service_id,
        day: DayOfWeek::Mon,
        start: t("09:00"),
        end: t("12:00"),
        break_between,
        max_concurrent,
        duration_override: None,
    }
}

fn request(f: &Fixture, date: NaiveDate, time: &str) -> ReservationRequest {
    ReservationRequest {
        id: Ulid::new(),
        business_id: f.business,
        service_id: f.service,
        customer: Customer {
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
            phone: "+44 20 7946 0000".into(),
        },
        date,
        time: t(time),
        notes: None,
    }
}

fn form(service_id: Ulid, date: &str, time: &str) -> BookingForm {
    BookingForm {
        id: Ulid::new(),
        service_id,
        customer_name: "Grace Hopper".into(),
        customer_email: "grace@example.com".into(),
        customer_phone: "555-0199".into(),
        date: date.into(),
        time: time.into(),
        notes: Some("first visit".into()),
    }
}

fn slot_times(slots: &[Slot]) -> Vec<String> {
    slots.iter().map(|s| s.time.to_string()).collect()
}

// ── Slot listing ─────────────────────────────────────────

#[tokio::test]
async fn hourly_slots_without_break() {
    let f = fixture("hourly.wal", 0, 1).await;
    let slots = f
        .engine
        .list_available_slots(f.business, f.service, monday(), monday())
        .await
        .unwrap();
    assert_eq!(slot_times(&slots), ["09:00", "10:00", "11:00"]);
    assert!(slots.iter().all(|s| s.available && s.remaining_capacity == 1));
}

#[tokio::test]
async fn break_between_spaces_slots() {
    let f = fixture("break.wal", 15, 1).await;
    let slots = f
        .engine
        .list_available_slots(f.business, f.service, monday(), monday())
        .await
        .unwrap();
    assert_eq!(slot_times(&slots), ["09:00", "10:15"]);
}

#[tokio::test]
async fn listing_spans_weeks_and_skips_closed_days() {
    let f = fixture("weeks.wal", 0, 1).await;
    let to = monday() + chrono::Days::new(7);
    let slots = f
        .engine
        .list_available_slots(f.business, f.service, monday(), to)
        .await
        .unwrap();
    assert_eq!(slots.len(), 6);
    assert!(slots.iter().all(|s| DayOfWeek::of(s.date) == DayOfWeek::Mon));
    assert_eq!(slots[3].date, to);
}

#[tokio::test]
async fn booking_reduces_remaining_capacity() {
    let f = fixture("remaining.wal", 0, 2).await;
    f.engine.reserve(request(&f, monday(), "10:00")).await.unwrap();
    let slots = f
        .engine
        .list_available_slots(f.business, f.service, monday(), monday())
        .await
        .unwrap();
    let ten = slots.iter().find(|s| s.time == t("10:00")).unwrap();
    assert_eq!(ten.remaining_capacity, 1);
    assert!(ten.available);

    f.engine.reserve(request(&f, monday(), "10:00")).await.unwrap();
    let slots = f
        .engine
        .list_available_slots(f.business, f.service, monday(), monday())
        .await
        .unwrap();
    let ten = slots.iter().find(|s| s.time == t("10:00")).unwrap();
    assert_eq!(ten.remaining_capacity, 0);
    assert!(!ten.available);
}

#[tokio::test]
async fn slot_range_is_checked() {
    let f = fixture("range.wal", 0, 1).await;
    let reversed = f
        .engine
        .list_available_slots(f.business, f.service, tuesday(), monday())
        .await;
    assert!(matches!(reversed, Err(EngineError::Validation(_))));

    let too_far = monday() + chrono::Days::new(MAX_SLOT_QUERY_DAYS as u64);
    let wide = f
        .engine
        .list_available_slots(f.business, f.service, monday(), too_far)
        .await;
    assert!(matches!(wide, Err(EngineError::LimitExceeded(_))));

    let malformed = f
        .engine
        .list_available_slots_between(f.business, f.service, "2026-10-19", "2026/10/20")
        .await;
    assert!(matches!(malformed, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn slots_for_service_of_another_business_are_not_found() {
    let f = fixture("slots_foreign.wal", 0, 1).await;
    let other = fixture("slots_foreign_other.wal", 0, 1).await;
    let result = f
        .engine
        .list_available_slots(f.business, other.service, monday(), monday())
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(..))));
}

// ── Reservations ─────────────────────────────────────────

#[tokio::test]
async fn reserve_commits_pending_booking() {
    let f = fixture("commit.wal", 0, 1).await;
    let booking = assert_ok!(f.engine.reserve(request(&f, monday(), "09:00")).await);
    assert_eq!(booking.status, BookingStatus::Pending);
    assert!(!booking.email_confirmed);
    assert_eq!(booking.business_id, f.business);
    assert_eq!(f.engine.get_booking(f.business, booking.id).await.unwrap(), booking);
}

#[tokio::test]
async fn auto_confirm_starts_confirmed() {
    let options = EngineOptions {
        initial_status: BookingStatus::Confirmed,
        ..EngineOptions::default()
    };
    let f = fixture_with("auto_confirm.wal", 0, 1, options).await;
    let booking = f.engine.reserve(request(&f, monday(), "09:00")).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn create_booking_parses_text_fields() {
    let f = fixture("form.wal", 0, 1).await;
    let booking = assert_ok!(
        f.engine
            .create_booking(f.business, form(f.service, "2026-10-19", "11:00"))
            .await
    );
    assert_eq!(booking.date, monday());
    assert_eq!(booking.time, t("11:00"));
    assert_eq!(booking.notes.as_deref(), Some("first visit"));

    for (date, time) in [("2026-10-19", "11"), ("19/10/2026", "11:00"), ("2026-02-30", "09:00")] {
        let result = f.engine.create_booking(f.business, form(f.service, date, time)).await;
        assert!(
            matches!(result, Err(EngineError::Validation(_))),
            "{date} {time} should be rejected"
        );
    }
}

#[tokio::test]
async fn last_slot_boundary() {
    let f = fixture("boundary.wal", 0, 1).await;
    // 11:00 + 60 min ends exactly at close
    assert_ok!(f.engine.reserve(request(&f, monday(), "11:00")).await);

    let late = f.engine.reserve(request(&f, monday(), "11:01")).await;
    assert!(matches!(late, Err(EngineError::Validation(_))));
    let at_close = f.engine.reserve(request(&f, monday(), "12:00")).await;
    assert!(matches!(at_close, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn off_grid_time_is_validation_error() {
    let f = fixture("off_grid.wal", 15, 1).await;
    // grid is 09:00, 10:15
    assert_ok!(f.engine.reserve(request(&f, monday(), "10:15")).await);
    let off = f.engine.reserve(request(&f, monday(), "10:00")).await;
    assert!(matches!(off, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn closed_day_is_validation_error() {
    let f = fixture("closed_day.wal", 0, 1).await;
    let result = f.engine.reserve(request(&f, tuesday(), "09:00")).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn full_slot_is_unavailable() {
    let f = fixture("full.wal", 0, 1).await;
    f.engine.reserve(request(&f, monday(), "09:00")).await.unwrap();
    let second = f.engine.reserve(request(&f, monday(), "09:00")).await;
    match second {
        Err(EngineError::SlotUnavailable { key, .. }) => {
            assert_eq!(key.date, monday());
            assert_eq!(key.time, t("09:00"));
        }
        other => panic!("expected SlotUnavailable, got {other:?}"),
    }
    // other slots are unaffected
    assert_ok!(f.engine.reserve(request(&f, monday(), "10:00")).await);
}

#[tokio::test]
async fn duplicate_booking_id_already_exists() {
    let f = fixture("duplicate.wal", 0, 3).await;
    let req = request(&f, monday(), "09:00");
    f.engine.reserve(req.clone()).await.unwrap();
    let again = f.engine.reserve(req.clone()).await;
    assert!(matches!(again, Err(EngineError::AlreadyExists(id)) if id == req.id));
}

#[tokio::test]
async fn wrong_business_is_not_found() {
    let f = fixture("wrong_business.wal", 0, 1).await;
    let mut req = request(&f, monday(), "09:00");
    req.business_id = Ulid::new();
    let result = f.engine.reserve(req).await;
    assert!(matches!(result, Err(EngineError::NotFound(..))));
}

#[tokio::test]
async fn service_of_sibling_business_is_not_found() {
    let f = fixture("sibling.wal", 0, 1).await;
    let bs = f.engine.get_business(&f.business).unwrap();
    let owner = bs.read().await.business.owner_id;
    let sibling = Ulid::new();
    f.engine
        .create_business(Business {
            id: sibling,
            owner_id: owner,
            name: "Southside Barbers".into(),
            contact_email: None,
        })
        .await
        .unwrap();
    let mut req = request(&f, monday(), "09:00");
    req.business_id = sibling;
    assert!(matches!(f.engine.reserve(req).await, Err(EngineError::NotFound(..))));
}

#[tokio::test]
async fn customer_fields_are_validated() {
    let f = fixture("customer.wal", 0, 1).await;

    let mut no_name = request(&f, monday(), "09:00");
    no_name.customer.name = "   ".into();
    assert!(matches!(f.engine.reserve(no_name).await, Err(EngineError::Validation(_))));

    let mut bad_email = request(&f, monday(), "09:00");
    bad_email.customer.email = "not-an-address".into();
    assert!(matches!(f.engine.reserve(bad_email).await, Err(EngineError::Validation(_))));

    let mut long_notes = request(&f, monday(), "09:00");
    long_notes.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
    assert!(matches!(f.engine.reserve(long_notes).await, Err(EngineError::LimitExceeded(_))));

    // nothing was committed
    assert_ok!(f.engine.reserve(request(&f, monday(), "09:00")).await);
}

#[tokio::test]
async fn reservation_is_queued_for_notification() {
    let f = fixture("queued.wal", 0, 1).await;
    let mut rx = f.engine.notify.take_receiver().unwrap();
    let booking = f.engine.reserve(request(&f, monday(), "09:00")).await.unwrap();
    assert_eq!(rx.try_recv().unwrap(), booking.id);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserves_on_single_capacity_slot() {
    let f = fixture("race_one.wal", 0, 1).await;
    let req_a = request(&f, monday(), "09:00");
    let req_b = request(&f, monday(), "09:00");
    let engine = Arc::new(f.engine);

    let a = tokio::spawn({
        let engine = engine.clone();
        async move { engine.reserve(req_a).await }
    });
    let b = tokio::spawn({
        let engine = engine.clone();
        async move { engine.reserve(req_b).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::SlotUnavailable { .. })))
            .count(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserves_never_exceed_capacity() {
    let f = fixture("race_many.wal", 0, 3).await;
    let (business, service) = (f.business, f.service);
    let requests: Vec<_> = (0..24).map(|_| request(&f, monday(), "10:00")).collect();
    let engine = Arc::new(f.engine);

    let mut handles = Vec::new();
    for req in requests {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.reserve(req).await }));
    }
    let mut committed = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => committed += 1,
            Err(EngineError::SlotUnavailable { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(committed, 3);

    let ss = engine.get_service(&service).unwrap();
    let key = SlotKey {
        date: monday(),
        time: t("10:00"),
    };
    assert_eq!(ss.read().await.active_count(&key), 3);
    let slots = engine
        .list_available_slots(business, service, monday(), monday())
        .await
        .unwrap();
    assert_eq!(slots.iter().find(|s| s.time == t("10:00")).unwrap().remaining_capacity, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_booking_id_on_two_services_commits_once() {
    let f = fixture("race_same_id.wal", 0, 10).await;
    let second = Ulid::new();
    f.engine
        .create_service(Service {
            id: second,
            business_id: f.business,
            name: "Beard trim".into(),
            duration: 60,
            price: 1500,
            category: "hair".into(),
        })
        .await
        .unwrap();
    f.engine
        .set_service_availability(f.business, monday_rule(second, 0, 10))
        .await
        .unwrap();
    let engine = Arc::new(f.engine);

    for round in 0..20u32 {
        let time = ["09:00", "10:00", "11:00"][(round % 3) as usize];
        let first = ReservationRequest {
            id: Ulid::new(),
            business_id: f.business,
            service_id: f.service,
            customer: Customer {
                name: "Ada Lovelace".into(),
                email: "ada@example.com".into(),
                phone: "+44 20 7946 0000".into(),
            },
            date: monday(),
            time: t(time),
            notes: None,
        };
        let other = ReservationRequest {
            service_id: second,
            ..first.clone()
        };

        let a = tokio::spawn({
            let engine = engine.clone();
            async move { engine.reserve(first).await }
        });
        let b = tokio::spawn({
            let engine = engine.clone();
            async move { engine.reserve(other).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "round {round}");
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(EngineError::AlreadyExists(_)))),
            "round {round}"
        );
    }

    let mut active = 0;
    for service in [f.service, second] {
        let ss = engine.get_service(&service).unwrap();
        let guard = ss.read().await;
        for time in ["09:00", "10:00", "11:00"] {
            active += guard.active_count(&SlotKey {
                date: monday(),
                time: t(time),
            });
        }
    }
    assert_eq!(active, 20);
}

#[tokio::test]
async fn contended_lock_times_out_as_unavailable() {
    let options = EngineOptions {
        lock_timeout: Duration::from_millis(50),
        ..EngineOptions::default()
    };
    let f = fixture_with("lock_timeout.wal", 0, 1, options).await;
    let ss = f.engine.get_service(&f.service).unwrap();
    let held = ss.write().await;

    let result = f.engine.reserve(request(&f, monday(), "09:00")).await;
    assert!(matches!(result, Err(EngineError::SlotUnavailable { .. })));

    drop(held);
    assert_ok!(f.engine.reserve(request(&f, monday(), "09:00")).await);
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn cancel_frees_capacity() {
    let f = fixture("cancel.wal", 0, 1).await;
    let booking = f.engine.reserve(request(&f, monday(), "09:00")).await.unwrap();
    let cancelled = f.engine.cancel_booking(f.business, booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_ok!(f.engine.reserve(request(&f, monday(), "09:00")).await);
}

#[tokio::test]
async fn status_transitions_are_enforced() {
    let f = fixture("transitions.wal", 0, 2).await;
    let booking = f.engine.reserve(request(&f, monday(), "09:00")).await.unwrap();

    let confirmed = f
        .engine
        .set_booking_status(f.business, booking.id, BookingStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);

    let back = f
        .engine
        .set_booking_status(f.business, booking.id, BookingStatus::Pending)
        .await;
    assert!(matches!(back, Err(EngineError::Validation(_))));

    f.engine
        .set_booking_status(f.business, booking.id, BookingStatus::Completed)
        .await
        .unwrap();
    let cancel_completed = f.engine.cancel_booking(f.business, booking.id).await;
    assert!(matches!(cancel_completed, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn status_change_from_other_business_is_not_found() {
    let f = fixture("status_foreign.wal", 0, 1).await;
    let booking = f.engine.reserve(request(&f, monday(), "09:00")).await.unwrap();
    let result = f.engine.cancel_booking(Ulid::new(), booking.id).await;
    assert!(matches!(result, Err(EngineError::NotFound("booking", _))));
    let missing = f.engine.cancel_booking(f.business, Ulid::new()).await;
    assert!(matches!(missing, Err(EngineError::NotFound("booking", _))));
}

#[tokio::test]
async fn email_confirmation_is_idempotent() {
    let f = fixture("email_confirmed.wal", 0, 1).await;
    let booking = f.engine.reserve(request(&f, monday(), "09:00")).await.unwrap();
    assert!(f.engine.mark_email_confirmed(booking.id).await.unwrap());
    assert!(!f.engine.mark_email_confirmed(booking.id).await.unwrap());
    assert!(f.engine.get_booking(f.business, booking.id).await.unwrap().email_confirmed);
}

// ── Sweep candidates ─────────────────────────────────────

#[tokio::test]
async fn unconfirmed_window_excludes_old_bookings() {
    let f = fixture("window.wal", 0, 3).await;
    let old = f.engine.reserve(request(&f, monday(), "09:00")).await.unwrap();
    let fresh = f.engine.reserve(request(&f, monday(), "10:00")).await.unwrap();
    let confirmed = f.engine.reserve(request(&f, monday(), "11:00")).await.unwrap();
    f.engine.mark_email_confirmed(confirmed.id).await.unwrap();

    let now = now_ms();
    {
        let ss = f.engine.get_service(&f.service).unwrap();
        let mut guard = ss.write().await;
        let key = old.key();
        guard.booking_mut(&key, old.id).unwrap().created_at = now - 10 * DAY;
    }

    let batch = f
        .engine
        .unconfirmed_bookings(now, SWEEP_WINDOW_MS, SWEEP_BATCH_SIZE)
        .await;
    let ids: Vec<Ulid> = batch.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![fresh.id]);
}

#[tokio::test]
async fn unconfirmed_batch_is_oldest_first_and_capped() {
    let f = fixture("batch_cap.wal", 0, 3).await;
    let now = now_ms();
    let mut made = Vec::new();
    for (i, time) in ["09:00", "10:00", "11:00"].iter().enumerate() {
        let b = f.engine.reserve(request(&f, monday(), time)).await.unwrap();
        let ss = f.engine.get_service(&f.service).unwrap();
        let mut guard = ss.write().await;
        guard.booking_mut(&b.key(), b.id).unwrap().created_at = now - DAY + i as Ms;
        made.push(b.id);
    }

    let batch = f.engine.unconfirmed_bookings(now, SWEEP_WINDOW_MS, 2).await;
    let ids: Vec<Ulid> = batch.iter().map(|b| b.id).collect();
    assert_eq!(ids, made[..2]);
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn business_info_reports_all_seven_days() {
    let f = fixture("info.wal", 0, 1).await;
    f.engine
        .set_business_hours(BusinessHours {
            business_id: f.business,
            day: DayOfWeek::Mon,
            is_open: true,
            start: t("08:30"),
            end: t("18:00"),
        })
        .await
        .unwrap();
    f.engine
        .set_business_hours(BusinessHours {
            business_id: f.business,
            day: DayOfWeek::Sun,
            is_open: false,
            start: ClockTime::default(),
            end: ClockTime::default(),
        })
        .await
        .unwrap();

    let info = f.engine.get_business_info(f.business).await.unwrap();
    assert_eq!(info.business.name, "Northside Barbers");
    assert_eq!(info.services_count, 1);
    assert_eq!(info.weekly_hours.len(), 7);
    let mon = &info.weekly_hours[0];
    assert!(mon.is_open);
    assert_eq!(mon.start.as_deref(), Some("08:30"));
    assert_eq!(mon.end.as_deref(), Some("18:00"));
    for closed in &info.weekly_hours[1..] {
        assert!(!closed.is_open);
        assert_eq!(closed.start, None);
    }

    let missing = f.engine.get_business_info(Ulid::new()).await;
    assert!(matches!(missing, Err(EngineError::NotFound("business", _))));
}

#[tokio::test]
async fn catalog_rejects_bad_input() {
    let f = fixture("catalog.wal", 0, 1).await;

    let short_key = f.engine.create_owner(Ulid::new(), "short".into()).await;
    assert!(matches!(short_key, Err(EngineError::Validation(_))));

    let orphan = f
        .engine
        .create_business(Business {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: "Nobody's".into(),
            contact_email: None,
        })
        .await;
    assert!(matches!(orphan, Err(EngineError::NotFound("owner", _))));

    let zero = f
        .engine
        .create_service(Service {
            id: Ulid::new(),
            business_id: f.business,
            name: "Nothing".into(),
            duration: 0,
            price: 0,
            category: "misc".into(),
        })
        .await;
    assert!(matches!(zero, Err(EngineError::Validation(_))));

    let dup = f
        .engine
        .create_service(Service {
            id: f.service,
            business_id: f.business,
            name: "Haircut again".into(),
            duration: 30,
            price: 0,
            category: "hair".into(),
        })
        .await;
    assert!(matches!(dup, Err(EngineError::AlreadyExists(_))));

    let mut inverted = monday_rule(f.service, 0, 1);
    inverted.start = t("12:00");
    inverted.end = t("09:00");
    let result = f.engine.set_service_availability(f.business, inverted).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn availability_can_be_replaced_and_removed() {
    let f = fixture("availability.wal", 0, 1).await;
    let mut widened = monday_rule(f.service, 0, 2);
    widened.end = t("13:00");
    f.engine.set_service_availability(f.business, widened.clone()).await.unwrap();
    assert_eq!(
        f.engine.service_availability(f.business, f.service).await.unwrap(),
        vec![widened]
    );

    f.engine
        .remove_service_availability(f.business, f.service, DayOfWeek::Mon)
        .await
        .unwrap();
    assert!(f.engine.service_availability(f.business, f.service).await.unwrap().is_empty());
    let slots = f
        .engine
        .list_available_slots(f.business, f.service, monday(), monday())
        .await
        .unwrap();
    assert!(slots.is_empty());

    let again = f
        .engine
        .remove_service_availability(f.business, f.service, DayOfWeek::Mon)
        .await;
    assert!(matches!(again, Err(EngineError::NotFound("availability", _))));
}

// ── Ledger ───────────────────────────────────────────────

#[tokio::test]
async fn replay_restores_catalog_and_bookings() {
    let path = test_wal_path("replay.wal");
    let owner = Ulid::new();
    let (business, service, booking) = {
        let engine = new_engine(path.clone(), EngineOptions::default());
        let f = Fixture {
            business: Ulid::new(),
            service: Ulid::new(),
            engine,
        };
        f.engine.create_owner(owner, KEY.into()).await.unwrap();
        f.engine
            .create_business(Business {
                id: f.business,
                owner_id: owner,
                name: "Replay Spa".into(),
                contact_email: None,
            })
            .await
            .unwrap();
        f.engine
            .create_service(Service {
                id: f.service,
                business_id: f.business,
                name: "Massage".into(),
                duration: 60,
                price: 9000,
                category: "spa".into(),
            })
            .await
            .unwrap();
        f.engine
            .set_service_availability(f.business, monday_rule(f.service, 0, 1))
            .await
            .unwrap();
        let booking = f.engine.reserve(request(&f, monday(), "10:00")).await.unwrap();
        f.engine.mark_email_confirmed(booking.id).await.unwrap();
        (f.business, f.service, booking.id)
    };

    let engine = new_engine(path, EngineOptions::default());
    assert!(engine.verify_owner_key(&owner, KEY));
    assert_eq!(engine.businesses_owned_by(&owner), vec![business]);
    assert_eq!(engine.list_services(business).await.unwrap().len(), 1);
    let restored = engine.get_booking(business, booking).await.unwrap();
    assert!(restored.email_confirmed);
    let slots = engine
        .list_available_slots(business, service, monday(), monday())
        .await
        .unwrap();
    assert!(!slots.iter().find(|s| s.time == t("10:00")).unwrap().available);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let engine = new_engine(path.clone(), EngineOptions::default());
    let owner = Ulid::new();
    let (business, service) = (Ulid::new(), Ulid::new());
    engine.create_owner(owner, KEY.into()).await.unwrap();
    engine
        .create_business(Business {
            id: business,
            owner_id: owner,
            name: "Compact Clinic".into(),
            contact_email: None,
        })
        .await
        .unwrap();
    engine
        .create_service(Service {
            id: service,
            business_id: business,
            name: "Checkup".into(),
            duration: 60,
            price: 0,
            category: "health".into(),
        })
        .await
        .unwrap();
    engine
        .set_service_availability(business, monday_rule(service, 0, 1))
        .await
        .unwrap();
    let f = Fixture {
        engine,
        business,
        service,
    };
    let kept = f.engine.reserve(request(&f, monday(), "09:00")).await.unwrap();
    let dropped = f.engine.reserve(request(&f, monday(), "10:00")).await.unwrap();
    f.engine.cancel_booking(business, dropped.id).await.unwrap();

    assert_eq!(f.engine.wal_appends_since_compact().await, 7);
    f.engine.compact_wal().await.unwrap();
    assert_eq!(f.engine.wal_appends_since_compact().await, 0);

    let engine = new_engine(path, EngineOptions::default());
    assert_eq!(engine.get_booking(business, kept.id).await.unwrap().status, BookingStatus::Pending);
    assert_eq!(
        engine.get_booking(business, dropped.id).await.unwrap().status,
        BookingStatus::Cancelled
    );
    assert_eq!(engine.service_availability(business, service).await.unwrap().len(), 1);
    assert_eq!(engine.businesses_owned_by(&owner), vec![business]);
}

#[tokio::test]
async fn group_commit_survives_concurrent_appends() {
    let path = test_wal_path("group_commit.wal");
    let engine = Arc::new(new_engine(path.clone(), EngineOptions::default()));
    let owner = Ulid::new();
    engine.create_owner(owner, KEY.into()).await.unwrap();

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_business(Business {
                    id: Ulid::new(),
                    owner_id: owner,
                    name: format!("Branch {i}"),
                    contact_email: None,
                })
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.businesses_owned_by(&owner).len(), n);

    let replayed = new_engine(path, EngineOptions::default());
    assert_eq!(replayed.businesses_owned_by(&owner).len(), n);
}
