//! Composite canvassing operations.
//!
//! Each entry point composes ledger, policy and aggregate primitives and
//! owns the consistency boundary: the status write and its counter deltas
//! always commit or roll back together, inside one transaction on the
//! exclusive connection. Callers run these through `DbHandle::call`, which
//! additionally serializes whole operations against each other.

use tracing::debug;

use super::db::TrackerDb;
use super::models::{CounterOp, DoorEvent, DoorKey, LeadRecord, Location, NextEvent};
use super::policy;
use crate::errors::TrackerError;

/// A contact attempt at a door. Creates the `not_opened` ledger row on
/// first contact, refreshes `updated_at` on a repeat, and increments the
/// location's `door_count` either way. Never changes a status.
pub fn knock(db: &TrackerDb, key: &DoorKey) -> Result<Location, TrackerError> {
    let tx = db.begin()?;
    db.get_location(key.location_id)?;
    let (_, created) = db.get_or_init_status(key)?;
    if !created {
        db.touch_status(key)?;
    }
    db.increment_knock_count(key.location_id)?;
    let location = db.get_location(key.location_id)?;
    tx.commit()?;
    debug!(location_id = key.location_id, created, "door knocked");
    Ok(location)
}

/// Request a status change for a door. Downgrades are ignored by policy:
/// the caller gets the current aggregate back, successfully. An applied
/// transition writes the new status and its counter deltas as one unit.
pub fn advance_status(
    db: &TrackerDb,
    key: &DoorKey,
    to: NextEvent,
) -> Result<Location, TrackerError> {
    let tx = db.begin()?;
    db.get_location(key.location_id)?;
    let (from, _) = db.get_or_init_status(key)?;

    if policy::is_downgrade(from, to) {
        let location = db.get_location(key.location_id)?;
        tx.commit()?;
        debug!(location_id = key.location_id, %from, %to, "downgrade ignored");
        return Ok(location);
    }

    let deltas = policy::transition_deltas(from, to);
    db.set_status(key, to.as_event())?;
    db.apply_delta(key.location_id, &deltas)?;
    let location = db.get_location(key.location_id)?;
    tx.commit()?;
    debug!(location_id = key.location_id, %from, %to, "status advanced");
    Ok(location)
}

/// Convert a door to a lead. Advances the status to `lead` (with the
/// implied deltas) and commits that pair first, then appends the lead
/// record. A `DuplicateLead` failure therefore never rolls back the
/// status advance; on the re-entry path (door already at `lead`) the
/// advance was a no-op anyway, so repeated calls are safe and leave
/// exactly one record.
pub fn record_lead(
    db: &TrackerDb,
    key: &DoorKey,
    first_name: &str,
    last_name: Option<&str>,
) -> Result<(LeadRecord, Location), TrackerError> {
    let first_name = first_name.trim();
    if first_name.is_empty() {
        return Err(TrackerError::Validation("first_name must be non-empty".into()));
    }
    let last_name = last_name.map(str::trim).filter(|s| !s.is_empty());

    let tx = db.begin()?;
    db.get_location(key.location_id)?;
    let (from, _) = db.get_or_init_status(key)?;
    if from != DoorEvent::Lead {
        let deltas = policy::transition_deltas(from, NextEvent::Lead);
        db.set_status(key, DoorEvent::Lead)?;
        db.apply_delta(key.location_id, &deltas)?;
    }
    tx.commit()?;

    let lead = db.insert_lead(key, first_name, last_name)?;
    let location = db.get_location(key.location_id)?;
    debug!(location_id = key.location_id, lead_id = lead.id, "lead recorded");
    Ok((lead, location))
}

/// Operator counter adjustment, all ops applied atomically.
pub fn adjust_counters(
    db: &TrackerDb,
    location_id: i64,
    ops: &[CounterOp],
) -> Result<Location, TrackerError> {
    let tx = db.begin()?;
    db.adjust_counters(location_id, ops)?;
    let location = db.get_location(location_id)?;
    tx.commit()?;
    Ok(location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvass::db::DbHandle;
    use crate::canvass::models::CounterField;

    fn setup() -> (TrackerDb, DoorKey) {
        let db = TrackerDb::new_in_memory().unwrap();
        let loc = db.create_location("Teststrasse 1, 1010 Wien").unwrap();
        let key = DoorKey::new(loc.id, "A", "2", "5").unwrap();
        (db, key)
    }

    #[test]
    fn test_knock_creates_status_and_counts() {
        let (db, key) = setup();
        let loc = knock(&db, &key).unwrap();
        assert_eq!(loc.door_count, 1);
        assert_eq!(loc.doors_opened, 0);

        let (event, created) = db.get_or_init_status(&key).unwrap();
        assert_eq!(event, DoorEvent::NotOpened);
        assert!(!created);
    }

    #[test]
    fn test_every_knock_counts_even_at_terminal_status() {
        let (db, key) = setup();
        knock(&db, &key).unwrap();
        advance_status(&db, &key, NextEvent::Lead).unwrap();
        let loc = knock(&db, &key).unwrap();
        assert_eq!(loc.door_count, 2);
        // Re-knock did not disturb the status or its counters
        assert_eq!(loc.leads, 1);
        let (event, _) = db.get_or_init_status(&key).unwrap();
        assert_eq!(event, DoorEvent::Lead);
    }

    #[test]
    fn test_knock_unknown_location() {
        let db = TrackerDb::new_in_memory().unwrap();
        let key = DoorKey::new(7, "A", "1", "1").unwrap();
        assert!(matches!(
            knock(&db, &key),
            Err(TrackerError::LocationNotFound { id: 7 })
        ));
    }

    #[test]
    fn test_advance_to_opened() {
        let (db, key) = setup();
        let loc = advance_status(&db, &key, NextEvent::Opened).unwrap();
        assert_eq!(loc.doors_opened, 1);
        assert_eq!(loc.leads, 0);
        assert_eq!(loc.rejections, 0);
    }

    #[test]
    fn test_direct_conversion_implies_opening() {
        let (db, key) = setup();
        let loc = advance_status(&db, &key, NextEvent::Lead).unwrap();
        assert_eq!(loc.doors_opened, 1);
        assert_eq!(loc.leads, 1);
    }

    #[test]
    fn test_downgrade_is_a_successful_noop() {
        let (db, key) = setup();
        advance_status(&db, &key, NextEvent::Lead).unwrap();
        let loc = advance_status(&db, &key, NextEvent::Opened).unwrap();
        assert_eq!(loc.doors_opened, 1);
        assert_eq!(loc.leads, 1);
        let (event, _) = db.get_or_init_status(&key).unwrap();
        assert_eq!(event, DoorEvent::Lead, "status must not downgrade");
    }

    #[test]
    fn test_lateral_swap_moves_one_unit() {
        let (db, key) = setup();
        advance_status(&db, &key, NextEvent::Rejection).unwrap();
        let loc = advance_status(&db, &key, NextEvent::Lead).unwrap();
        assert_eq!(loc.rejections, 0);
        assert_eq!(loc.leads, 1);
        assert_eq!(loc.doors_opened, 1);
    }

    #[test]
    fn test_lateral_swap_round_trip_restores_counters() {
        let (db, key) = setup();
        advance_status(&db, &key, NextEvent::Rejection).unwrap();
        let before = db.get_location(key.location_id).unwrap();

        advance_status(&db, &key, NextEvent::Lead).unwrap();
        let after = advance_status(&db, &key, NextEvent::Rejection).unwrap();

        assert_eq!(after.doors_opened, before.doors_opened);
        assert_eq!(after.leads, before.leads);
        assert_eq!(after.rejections, before.rejections);
    }

    #[test]
    fn test_repeat_advance_is_idempotent() {
        let (db, key) = setup();
        advance_status(&db, &key, NextEvent::Lead).unwrap();
        let loc = advance_status(&db, &key, NextEvent::Lead).unwrap();
        assert_eq!(loc.leads, 1);
        assert_eq!(loc.doors_opened, 1);
    }

    #[test]
    fn test_record_lead_advances_and_registers() {
        let (db, key) = setup();
        let (lead, loc) = record_lead(&db, &key, " Anna ", None).unwrap();
        assert_eq!(lead.first_name, "Anna");
        assert_eq!(loc.leads, 1);
        assert_eq!(loc.doors_opened, 1);
        let (event, _) = db.get_or_init_status(&key).unwrap();
        assert_eq!(event, DoorEvent::Lead);
    }

    #[test]
    fn test_record_lead_twice_is_safe() {
        let (db, key) = setup();
        record_lead(&db, &key, "Anna", None).unwrap();
        let before = db.get_location(key.location_id).unwrap();

        let err = record_lead(&db, &key, "Anna", None).unwrap_err();
        assert!(matches!(err, TrackerError::DuplicateLead { .. }));

        // Exactly one record, counters untouched by the second call
        assert_eq!(db.list_leads(Some(key.location_id)).unwrap().len(), 1);
        let after = db.get_location(key.location_id).unwrap();
        assert_eq!(after.leads, before.leads);
        assert_eq!(after.doors_opened, before.doors_opened);
        assert_eq!(after.rejections, before.rejections);
    }

    #[test]
    fn test_record_lead_requires_first_name() {
        let (db, key) = setup();
        assert!(matches!(
            record_lead(&db, &key, "   ", None),
            Err(TrackerError::Validation(_))
        ));
        // Nothing was written
        assert!(db.list_leads(Some(key.location_id)).unwrap().is_empty());
    }

    #[test]
    fn test_record_lead_blank_last_name_stored_as_null() {
        let (db, key) = setup();
        let (lead, _) = record_lead(&db, &key, "Anna", Some("  ")).unwrap();
        assert!(lead.last_name.is_none());
    }

    #[test]
    fn test_adjust_counters_returns_fresh_snapshot() {
        let (db, key) = setup();
        let loc = adjust_counters(
            &db,
            key.location_id,
            &[CounterOp {
                field: CounterField::DoorCount,
                delta: 2,
            }],
        )
        .unwrap();
        assert_eq!(loc.door_count, 2);
    }

    #[test]
    fn test_full_canvassing_scenario() {
        // Knock -> open -> reject -> convert -> duplicate conversion,
        // checking every aggregate along the way.
        let (db, key) = setup();

        let loc = knock(&db, &key).unwrap();
        assert_eq!(loc.door_count, 1);

        let loc = advance_status(&db, &key, NextEvent::Opened).unwrap();
        assert_eq!(loc.doors_opened, 1);

        let loc = advance_status(&db, &key, NextEvent::Rejection).unwrap();
        assert_eq!(loc.rejections, 1);
        assert_eq!(loc.doors_opened, 1);

        let (lead, loc) = record_lead(&db, &key, "Anna", None).unwrap();
        assert_eq!(lead.first_name, "Anna");
        assert_eq!(loc.leads, 1);
        assert_eq!(loc.rejections, 0);
        let (event, _) = db.get_or_init_status(&key).unwrap();
        assert_eq!(event, DoorEvent::Lead);

        let err = record_lead(&db, &key, "Anna", None).unwrap_err();
        assert!(matches!(err, TrackerError::DuplicateLead { .. }));
        let after = db.get_location(key.location_id).unwrap();
        assert_eq!(after.leads, 1);
        assert_eq!(after.rejections, 0);
        assert_eq!(after.doors_opened, 1);
        assert_eq!(after.door_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_knocks_count_exactly_once_each() {
        let db = TrackerDb::new_in_memory().unwrap();
        let loc = db.create_location("Parallelgasse 1").unwrap();
        let handle = DbHandle::new(db);

        let n: i64 = 16;
        let tasks: Vec<_> = (0..n)
            .map(|_| {
                let handle = handle.clone();
                let key = DoorKey::new(loc.id, "A", "1", "1").unwrap();
                tokio::spawn(async move { handle.call(move |db| knock(db, &key)).await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let db = handle.lock_sync().unwrap();
        let location = db.get_location(loc.id).unwrap();
        assert_eq!(location.door_count, n);
        // One ledger row, no divergent duplicates
        assert_eq!(db.list_door_events(Some(loc.id)).unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_conversions_yield_one_lead() {
        let db = TrackerDb::new_in_memory().unwrap();
        let loc = db.create_location("Parallelgasse 2").unwrap();
        let handle = DbHandle::new(db);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let handle = handle.clone();
                let key = DoorKey::new(loc.id, "A", "1", "1").unwrap();
                tokio::spawn(async move {
                    handle
                        .call(move |db| record_lead(db, &key, &format!("Caller {i}"), None))
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        let mut duplicates = 0;
        for task in futures::future::join_all(tasks).await {
            match task.unwrap() {
                Ok(_) => ok += 1,
                Err(TrackerError::DuplicateLead { .. }) => duplicates += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(duplicates, 7);

        let location = handle
            .call(move |db| db.get_location(loc.id))
            .await
            .unwrap();
        assert_eq!(location.leads, 1);
        assert_eq!(location.doors_opened, 1);
    }
}
