use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

/// Word stored while nothing has been admitted yet.
const UNSET: i64 = i64::MIN;

/// A snapshot of the limiter's shared state, in nanoseconds from the limiter's anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct State {
    /// Logical slot of the last admitted request.
    pub(crate) last: i64,
    /// Positive: time still owed. Non-positive: idle credit.
    pub(crate) sleep_debt: i64,
}

impl State {
    /// The state committed by the very first admission.
    pub(crate) fn first(now: i64) -> Self {
        Self {
            last: now,
            sleep_debt: 0,
        }
    }

    /// Every decision depends on `last` and `sleep_debt` only through
    /// `sleep_debt - (now - last)`, so `(last, debt)` and `(last + debt, 0)` are the
    /// same state. The cell stores that single word.
    fn encode(self) -> i64 {
        self.last.saturating_add(self.sleep_debt)
    }

    fn decode(word: i64) -> Option<Self> {
        (word != UNSET).then_some(Self {
            last: word,
            sleep_debt: 0,
        })
    }
}

/// The one shared, contended value of a limiter.
///
/// The whole state lives in a single atomic word, so it is read and replaced as one
/// unit. The cell is aligned to (and therefore fills) a full cache line so the CAS
/// traffic on it never invalidates unrelated data placed next to it.
#[derive(Debug)]
#[repr(C, align(64))]
pub(crate) struct StateCell {
    word: AtomicI64,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            word: AtomicI64::new(UNSET),
        }
    }

    /// `None` until the first admission has been committed.
    #[inline]
    pub(crate) fn load(&self) -> Option<State> {
        State::decode(self.word.load(Ordering::Acquire))
    }

    /// Replaces `current` with `new`, failing if anyone committed since `current`
    /// was loaded.
    ///
    /// Two states can encode to the same word, so every commit moves the word at
    /// least 1ns forward. Without that, a commit that left the word unchanged would
    /// let a second writer holding the same snapshot succeed as well. A cell already
    /// at `i64::MAX` has nowhere to go and refuses every commit.
    #[inline]
    pub(crate) fn compare_and_swap(&self, current: Option<State>, new: State) -> bool {
        let current = current.map_or(UNSET, State::encode);
        let Some(floor) = current.checked_add(1) else {
            return false;
        };
        let new = new.encode().max(floor);
        self.word
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_fills_a_cache_line() {
        assert_eq!(std::mem::align_of::<StateCell>(), 64);
        assert_eq!(std::mem::size_of::<StateCell>(), 64);
    }

    #[test]
    fn it_starts_unset() {
        let cell = StateCell::new();
        assert_eq!(cell.load(), None);
    }

    #[test]
    fn test_swap_from_stale_snapshot_fails() {
        let cell = StateCell::new();

        let stale = cell.load();
        assert!(cell.compare_and_swap(stale, State::first(10)));
        // A second writer still holding the unset snapshot must lose.
        assert!(!cell.compare_and_swap(stale, State::first(20)));
        assert_eq!(cell.load(), Some(State::first(10)));

        let current = cell.load();
        let next = State {
            last: 110,
            sleep_debt: -40,
        };
        assert!(cell.compare_and_swap(current, next));
        assert!(!cell.compare_and_swap(current, State::first(500)));
    }

    #[test]
    fn test_debt_is_folded_into_last() {
        let cell = StateCell::new();
        let state = State {
            last: 1_000,
            sleep_debt: -300,
        };
        assert!(cell.compare_and_swap(None, state));

        // Stored in normal form, and equal to the state it came from.
        let loaded = cell.load();
        assert_eq!(
            loaded,
            Some(State {
                last: 700,
                sleep_debt: 0
            })
        );
        assert!(cell.compare_and_swap(Some(state), State::first(2_000)));
    }

    #[test]
    fn test_unchanged_word_still_invalidates_snapshot() {
        let cell = StateCell::new();
        assert!(cell.compare_and_swap(None, State::first(100)));

        // Same encoded word as the snapshot; it must still count as a change.
        let snapshot = cell.load();
        assert!(cell.compare_and_swap(snapshot, State::first(100)));
        assert!(!cell.compare_and_swap(snapshot, State::first(100)));
        assert_eq!(cell.load(), Some(State::first(101)));
    }

    #[test]
    fn test_saturated_cell_refuses_commits() {
        let cell = StateCell::new();
        assert!(cell.compare_and_swap(None, State::first(i64::MAX)));

        let snapshot = cell.load();
        assert!(!cell.compare_and_swap(snapshot, State::first(i64::MAX)));
        assert_eq!(cell.load(), Some(State::first(i64::MAX)));
    }

    #[test]
    fn test_negative_words_are_not_unset() {
        let cell = StateCell::new();
        let state = State {
            last: 50,
            sleep_debt: -100,
        };
        assert!(cell.compare_and_swap(None, state));
        assert!(cell.load().is_some());
    }
}
