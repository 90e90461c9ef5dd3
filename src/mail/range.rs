//! Sequence range planning for "the N most recent messages".

use std::fmt;

/// Closed interval of 1-based sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRange {
    pub start: u32,
    pub end: u32,
}

impl FetchRange {
    /// Number of messages covered.
    pub fn count(&self) -> u32 {
        self.end - self.start + 1
    }
}

impl fmt::Display for FetchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Plan the range covering the last `max_to_fetch` of `total` messages.
///
/// Returns `None` for an empty mailbox; the caller must not fetch at all.
///
/// # Panics
///
/// If `max_to_fetch` is zero.
pub fn plan(total: u32, max_to_fetch: u32) -> Option<FetchRange> {
    assert!(max_to_fetch > 0, "max_to_fetch must be positive");
    if total == 0 {
        return None;
    }
    let start = total.saturating_sub(max_to_fetch).saturating_add(1).max(1);
    Some(FetchRange { start, end: total })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_twenty_of_hundred() {
        assert_eq!(plan(100, 20).unwrap().to_string(), "81:100");
    }

    #[test]
    fn fewer_messages_than_requested() {
        assert_eq!(plan(5, 20).unwrap().to_string(), "1:5");
    }

    #[test]
    fn empty_mailbox_plans_nothing() {
        assert_eq!(plan(0, 20), None);
    }

    #[test]
    fn exact_fit() {
        let r = plan(20, 20).unwrap();
        assert_eq!((r.start, r.end), (1, 20));
        assert_eq!(r.count(), 20);
    }

    #[test]
    fn single_message() {
        assert_eq!(plan(1, 1).unwrap().to_string(), "1:1");
        assert_eq!(plan(9, 1).unwrap().to_string(), "9:9");
    }

    #[test]
    fn bounds_hold_across_inputs() {
        for total in 1..60u32 {
            for max in 1..60u32 {
                let r = plan(total, max).unwrap();
                let expected_start = if max >= total { 1 } else { total - max + 1 };
                assert_eq!(r.start, expected_start);
                assert_eq!(r.end, total);
                assert!(r.start <= r.end);
                assert_eq!(r.count(), max.min(total));
            }
        }
    }

    #[test]
    fn huge_values_do_not_overflow() {
        let r = plan(u32::MAX, u32::MAX).unwrap();
        assert_eq!((r.start, r.end), (1, u32::MAX));
    }

    #[test]
    #[should_panic(expected = "max_to_fetch must be positive")]
    fn zero_max_is_a_contract_violation() {
        plan(10, 0);
    }
}
