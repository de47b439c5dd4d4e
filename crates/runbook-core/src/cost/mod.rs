//! Token/credit accounting for a run.
//!
//! All counters are non-negative integers. `settle` is atomic (the lock is
//! never held across an await) so `remaining()` is a monotonically
//! non-increasing sequence across the run. Overdraw is permitted post-hoc:
//! an adapter that under-estimated still settles, but the run flips into
//! drain mode and nonzero-cost steps stop being dispatched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::types::StepId;

/// Cost accounting errors.
#[derive(Debug, Error)]
pub enum CostError {
    #[error("CostOverflowError: token counter out of range")]
    Overflow,

    #[error("unknown reservation {0}")]
    UnknownReservation(u64),
}

/// A pending cost reservation handed out before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    id: u64,
    pub step_id: StepId,
    pub estimate: u64,
}

/// Outcome of settling a reservation, feeding `cost.update` audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostUpdate {
    pub step_id: StepId,
    /// Tokens actually spent.
    pub delta: u64,
    /// Budget remaining after the settle.
    pub remaining: u64,
    /// Whether the run is in drain mode after this settle.
    pub drained: bool,
}

/// Snapshot report of a run's spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostReport {
    pub initial_budget: u64,
    pub tokens_used_total: u64,
    pub remaining: u64,
    pub drain_mode: bool,
    /// Settled spend per step.
    pub per_step: BTreeMap<StepId, u64>,
}

struct Inner {
    initial: u64,
    remaining: u64,
    spent: u64,
    drain: bool,
    next_reservation: u64,
    outstanding: BTreeMap<u64, u64>,
    per_step: BTreeMap<StepId, u64>,
}

/// Integer token budget tracker.
pub struct CostTracker {
    inner: Mutex<Inner>,
}

impl CostTracker {
    pub fn new(budget: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                initial: budget,
                remaining: budget,
                spent: 0,
                drain: false,
                next_reservation: 0,
                outstanding: BTreeMap::new(),
                per_step: BTreeMap::new(),
            }),
        }
    }

    /// Budget remaining right now.
    pub fn remaining(&self) -> u64 {
        self.lock().remaining
    }

    /// Total settled spend.
    pub fn spent(&self) -> u64 {
        self.lock().spent
    }

    pub fn initial_budget(&self) -> u64 {
        self.lock().initial
    }

    /// Whether the run has entered budget-exceeded drain mode.
    pub fn in_drain_mode(&self) -> bool {
        self.lock().drain
    }

    /// Record an estimate for a step about to be dispatched.
    pub fn reserve(&self, step_id: &StepId, estimate: u64) -> Reservation {
        let mut inner = self.lock();
        let id = inner.next_reservation;
        inner.next_reservation += 1;
        inner.outstanding.insert(id, estimate);
        Reservation {
            id,
            step_id: step_id.clone(),
            estimate,
        }
    }

    /// Settle a reservation with the tokens actually reported. Overdraw is
    /// absorbed (remaining saturates at zero) and flips drain mode.
    pub fn settle(&self, reservation: Reservation, actual: u64) -> Result<CostUpdate, CostError> {
        let mut inner = self.lock();
        if inner.outstanding.remove(&reservation.id).is_none() {
            return Err(CostError::UnknownReservation(reservation.id));
        }

        inner.spent = inner.spent.checked_add(actual).ok_or(CostError::Overflow)?;
        if actual > inner.remaining {
            inner.drain = true;
        }
        inner.remaining = inner.remaining.saturating_sub(actual);

        let step_total = inner
            .per_step
            .entry(reservation.step_id.clone())
            .or_insert(0);
        *step_total = step_total.checked_add(actual).ok_or(CostError::Overflow)?;

        Ok(CostUpdate {
            step_id: reservation.step_id,
            delta: actual,
            remaining: inner.remaining,
            drained: inner.drain,
        })
    }

    /// Drop a reservation without spending (step failed before any work).
    pub fn release(&self, reservation: Reservation) {
        self.lock().outstanding.remove(&reservation.id);
    }

    pub fn report(&self) -> CostReport {
        let inner = self.lock();
        CostReport {
            initial_budget: inner.initial,
            tokens_used_total: inner.spent,
            remaining: inner.remaining,
            drain_mode: inner.drain,
            per_step: inner.per_step.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic inside one of the short critical
        // sections above; the counters are still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
