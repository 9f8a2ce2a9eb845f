//! Allowed block status transitions within one execution.
//!
//! ```text
//! pending -> running | completed | failed | skipped
//! running -> completed | failed | skipped
//! ```
//!
//! Terminal states do not move; only starting a new execution resets them to `pending`.
//! Repeating the current status is a duplicate, which keeps replayed events idempotent.

use super::BlockStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Duplicate,
    Rejected,
}

pub fn transition(current: BlockStatus, desired: BlockStatus) -> Transition {
    use BlockStatus::*;
    if current == desired {
        return Transition::Duplicate;
    }
    match (current, desired) {
        (Pending, Running | Completed | Failed | Skipped) => Transition::Applied,
        (Running, Completed | Failed | Skipped) => Transition::Applied,
        _ => Transition::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BlockStatus::*;

    #[test]
    fn forward_moves_apply() {
        assert_eq!(transition(Pending, Running), Transition::Applied);
        assert_eq!(transition(Running, Completed), Transition::Applied);
        assert_eq!(transition(Running, Failed), Transition::Applied);
        assert_eq!(transition(Pending, Skipped), Transition::Applied);
        assert_eq!(transition(Pending, Completed), Transition::Applied);
    }

    #[test]
    fn backward_and_terminal_moves_are_rejected() {
        assert_eq!(transition(Running, Pending), Transition::Rejected);
        assert_eq!(transition(Completed, Running), Transition::Rejected);
        assert_eq!(transition(Failed, Completed), Transition::Rejected);
        assert_eq!(transition(Skipped, Running), Transition::Rejected);
    }

    #[test]
    fn same_status_is_duplicate() {
        for status in [Pending, Running, Completed, Failed, Skipped] {
            assert_eq!(transition(status, status), Transition::Duplicate);
        }
    }
}
