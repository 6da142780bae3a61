//! Unlock attempt accounting
//!
//! Pure counter with no I/O. The orchestrator records a failure exactly
//! once per wrong-passphrase outcome, and never for a helper crash, which
//! is an infrastructure failure that must not consume an attempt. The
//! count is never decremented within a session.

/// Consecutive wrong passphrases tolerated before lockout.
pub const ATTEMPT_LIMIT: u32 = 3;

/// Tracks consecutive failed unlock attempts against a fixed limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptCounter {
    count: u32,
    limit: u32,
}

impl Default for AttemptCounter {
    fn default() -> Self {
        Self::new(ATTEMPT_LIMIT)
    }
}

impl AttemptCounter {
    /// Create a counter with the given limit.
    pub fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    /// Record one wrong-passphrase outcome.
    pub fn record_failure(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// True once the limit has been reached. Stays true; there is no reset
    /// within a session.
    pub fn is_locked_out(&self) -> bool {
        self.count >= self.limit
    }

    /// Attempts consumed so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The lockout threshold.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Attempts left before lockout, for the credential prompt.
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}
