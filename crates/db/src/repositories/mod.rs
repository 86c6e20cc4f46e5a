//! Database repositories.

mod poll;
mod vote;

pub use poll::{PollFilter, PollRepository};
pub use vote::{TallyRow, VoteRepository};
