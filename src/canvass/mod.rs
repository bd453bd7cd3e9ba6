//! Canvassing core — door statuses, location rollups, leads.
//!
//! ## Overview
//!
//! Every physical door a canvasser touches gets one ledger row with a
//! monotonic status (`not_opened` → `opened` → `lead`/`rejection`), and
//! every location carries four rollup counters kept consistent with those
//! statuses. The status rules and the counter deltas they imply live in
//! a pure policy module; everything effectful goes through the workflow
//! layer, which owns the consistency boundary.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)      │
//! └──────────┘          │    └─ api.rs  (route handlers, AppState)     │
//!                       │         │                                    │
//!                       │         │ workflow::knock / advance_status / │
//!                       │         │ record_lead                        │
//!                       │         v                                    │
//!                       │  workflow.rs  (composite ops, transactions)  │
//!                       │         │                                    │
//!                       │         │ policy::transition_deltas()        │
//!                       │         v                                    │
//!                       │  db.rs  (SQLite via DbHandle, Arc<Mutex<_>>) │
//!                       └──────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                        |
//! |------------|-------------------------------------------------------|
//! | `models`   | Shared types: `DoorEvent`, `DoorKey`, `Location`      |
//! | `policy`   | Pure transition rules: downgrade guard, counter deltas|
//! | `db`       | SQLite access, status ledger, aggregates, leads       |
//!
//! ## Typical Request Flow (advance a door to `lead`)
//!
//! 1. `POST /api/doors/advance` → `api::advance_door_status()`
//! 2. The handler builds a validated `DoorKey` and hands a closure to
//!    `DbHandle::call`, which serializes it on the blocking pool.
//! 3. `workflow::advance_status()` opens a transaction, reads (or lazily
//!    creates) the door's status, and asks the policy whether the request
//!    is a downgrade. Downgrades commit nothing and return the current
//!    `Location` — a successful no-op, not an error.
//! 4. Otherwise the new status and the policy's counter deltas are written
//!    as one unit; the deltas are single clamped `UPDATE` expressions, so
//!    counters can neither go negative nor lose increments.
//! 5. The refreshed `Location` snapshot travels back as the response.

pub mod api;
pub mod db;
pub mod models;
pub mod policy;
pub mod server;
pub mod workflow;
