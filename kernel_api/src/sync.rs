//! # Cancelable Lock
//!
//! User-level lock whose waiters block in the kernel (pause) and are woken
//! one at a time by the releasing owner (resume).
//!
//! ## Design
//!
//! The lock is a plain state machine: `Unlocked`, or `Locked` with an owner
//! and a FIFO of applicants. Releasing hands ownership directly to the
//! oldest applicant, so the woken thread never races for the lock again.
//! An applicant whose pause is cancelled by somebody else removes itself
//! with [`CancelableLock::cancel`], after which it can no longer be chosen.

use std::collections::VecDeque;

/// Lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
}

/// Result of trying to take the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The applicant owns the lock now
    Acquired,
    /// The applicant was queued and must block until woken
    MustWait,
}

/// Lock misuse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// Only the owner may release
    NotOwner,
    /// The applicant already owns the lock or waits for it
    AlreadyApplied,
}

#[derive(Debug, Clone)]
pub struct CancelableLock<A> {
    state: LockState,
    owner: Option<A>,
    applicants: VecDeque<A>,
}

impl<A: Copy + Eq> CancelableLock<A> {
    pub fn new() -> Self {
        Self {
            state: LockState::Unlocked,
            owner: None,
            applicants: VecDeque::new(),
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn owner(&self) -> Option<A> {
        self.owner
    }

    pub fn applicants(&self) -> impl Iterator<Item = &A> {
        self.applicants.iter()
    }

    pub fn lock(&mut self, applicant: A) -> Result<LockOutcome, LockError> {
        if self.owner == Some(applicant) || self.applicants.contains(&applicant) {
            return Err(LockError::AlreadyApplied);
        }
        match self.state {
            LockState::Unlocked => {
                self.state = LockState::Locked;
                self.owner = Some(applicant);
                Ok(LockOutcome::Acquired)
            }
            LockState::Locked => {
                self.applicants.push_back(applicant);
                Ok(LockOutcome::MustWait)
            }
        }
    }

    /// Releases the lock, returning the applicant that now owns it
    ///
    /// The caller is responsible for waking the returned applicant.
    pub fn unlock(&mut self, owner: A) -> Result<Option<A>, LockError> {
        if self.owner != Some(owner) {
            return Err(LockError::NotOwner);
        }
        match self.applicants.pop_front() {
            Some(next) => {
                self.owner = Some(next);
                Ok(Some(next))
            }
            None => {
                self.state = LockState::Unlocked;
                self.owner = None;
                Ok(None)
            }
        }
    }

    /// Withdraws a waiting applicant
    ///
    /// Returns false if `applicant` was not waiting, e.g. because the lock
    /// was handed to it in the meantime.
    pub fn cancel(&mut self, applicant: A) -> bool {
        let before = self.applicants.len();
        self.applicants.retain(|a| *a != applicant);
        self.applicants.len() != before
    }
}

impl<A: Copy + Eq> Default for CancelableLock<A> {
    fn default() -> Self {
        Self::new()
    }
}
