//! The admission scan shared by both strategies.
//!
//! Candidates are visited in arrival order against the remaining capacity. Each one
//! that fits is admitted and its permits are reserved for the rest of the pass. A
//! candidate that does not fit either ends the pass (FIFO) or is skipped (ASAP).

use crate::models::{Consumer, Spec, UnitQueue};

/// Admit candidates in order while capacity lasts.
///
/// Candidates asking for more than `limits` can never run; they are always skipped so
/// that they cannot wedge a FIFO queue behind them.
pub(crate) fn admission_scan<'a, I>(
    candidates: I,
    limits: u32,
    remaining: u32,
    stop_at_first_miss: bool,
) -> Vec<&'a Consumer>
where
    I: IntoIterator<Item = &'a Consumer>,
{
    let mut remaining = remaining;
    let mut admitted = Vec::new();

    for candidate in candidates {
        if candidate.permits > limits {
            continue;
        }
        if candidate.permits <= remaining {
            remaining -= candidate.permits;
            admitted.push(candidate);
        } else if stop_at_first_miss {
            break;
        }
    }

    admitted
}

/// Capacity left on a unit. Saturates when active consumers exceed a lowered limit.
pub(crate) fn remaining_capacity(spec: &Spec, queue: &UnitQueue) -> u32 {
    spec.limits.saturating_sub(queue.used_permits())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConsumerContext, State};

    fn blocked(id: &str, permits: u32) -> Consumer {
        Consumer::new(id.into(), permits, State::Blocked, ConsumerContext::new())
    }

    fn ids(admitted: Vec<&Consumer>) -> Vec<&str> {
        admitted.into_iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn skip_and_continue_admits_later_smaller_requests() {
        let queue = [blocked("a", 3), blocked("b", 8), blocked("c", 3)];
        assert_eq!(ids(admission_scan(&queue, 10, 10, false)), vec!["a", "c"]);
    }

    #[test]
    fn stop_at_first_miss_holds_back_the_tail() {
        let queue = [blocked("a", 3), blocked("b", 8), blocked("c", 3)];
        assert_eq!(ids(admission_scan(&queue, 10, 10, true)), vec!["a"]);
    }

    #[test]
    fn reserves_capacity_within_a_pass() {
        let queue = [blocked("a", 2), blocked("b", 2), blocked("c", 2)];
        assert_eq!(ids(admission_scan(&queue, 10, 5, false)), vec!["a", "b"]);
    }

    #[test]
    fn oversized_candidates_never_block() {
        let queue = [blocked("huge", 12), blocked("small", 1)];
        assert_eq!(ids(admission_scan(&queue, 10, 10, true)), vec!["small"]);
    }

    #[test]
    fn nothing_fits_without_capacity() {
        let queue = [blocked("a", 1)];
        assert!(admission_scan(&queue, 10, 0, false).is_empty());
    }
}
