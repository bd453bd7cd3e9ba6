//! Transition policy for door statuses.
//!
//! Pure functions only: given the current and the requested status, decide
//! whether the write happens at all (`is_downgrade`) and which counter
//! deltas it implies (`transition_deltas`). No store access and no failure
//! path; every `(from, to)` pair has a defined answer.

use super::models::{DoorEvent, NextEvent};

/// Signed counter adjustments implied by one status transition.
/// `door_count` is not here — knocks are counted unconditionally by the
/// workflow, independent of any transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deltas {
    pub doors_opened: i64,
    pub leads: i64,
    pub rejections: i64,
}

impl Deltas {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// A downgrade is any request for a strictly lower-ranked status. The
/// workflow skips the write entirely and returns the current aggregate;
/// this is a policy no-op, not an error. Equal ranks pass — that is the
/// lateral swap between `lead` and `rejection` (and a same-status
/// re-request, whose deltas are all zero).
pub fn is_downgrade(from: DoorEvent, to: NextEvent) -> bool {
    to.rank() < from.rank()
}

/// Counter deltas for an applied transition.
///
/// Moving off `not_opened` always opens the door, even when the target is
/// `lead` or `rejection` directly. Entering `lead` or `rejection` from the
/// opposite terminal state undoes that state's counter, so a lateral swap
/// moves one unit between `leads` and `rejections` and leaves
/// `doors_opened` alone.
pub fn transition_deltas(from: DoorEvent, to: NextEvent) -> Deltas {
    let mut d = Deltas::default();
    match to {
        NextEvent::Opened => {
            if from == DoorEvent::NotOpened {
                d.doors_opened = 1;
            }
        }
        NextEvent::Lead => {
            if from == DoorEvent::NotOpened {
                d.doors_opened = 1;
            }
            if from != DoorEvent::Lead {
                d.leads = 1;
            }
            if from == DoorEvent::Rejection {
                d.rejections = -1;
            }
        }
        NextEvent::Rejection => {
            if from == DoorEvent::NotOpened {
                d.doors_opened = 1;
            }
            if from != DoorEvent::Rejection {
                d.rejections = 1;
            }
            if from == DoorEvent::Lead {
                d.leads = -1;
            }
        }
    }
    d
}
