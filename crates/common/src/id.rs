//! Row identifiers.
//!
//! Every id is a lowercase ULID, so rows listed by primary key come back in
//! creation order. Option ids are derived from their poll's id.

use ulid::Ulid;

/// Issues ids for polls, options and votes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator;

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// A fresh time-ordered id.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Id of the option at `position` within `poll_id`.
    ///
    /// Stable for a given poll, so options sort by position under their poll.
    #[must_use]
    pub fn option_id(&self, poll_id: &str, position: usize) -> String {
        format!("{poll_id}-{position:02}")
    }
}
