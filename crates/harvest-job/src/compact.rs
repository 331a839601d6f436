//! In-place pruning of optional entries.

/// Keep the `Some` entries satisfying `keep`, in their original order.
///
/// Works on the existing allocation. Dropped entries are dropped immediately,
/// so the buffer holds no reference to them afterwards.
pub fn compact<T>(entries: &mut Vec<Option<T>>, mut keep: impl FnMut(&T) -> bool) {
    entries.retain(|entry| entry.as_ref().is_some_and(&mut keep));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn preserves_order_of_kept_entries() {
        let mut v: Vec<Option<u32>> = (0..10).map(Some).collect();
        compact(&mut v, |n| n % 3 == 0);
        assert_eq!(v, vec![Some(0), Some(3), Some(6), Some(9)]);
    }

    #[test]
    fn none_entries_are_always_dropped() {
        let mut v = vec![None, Some(1), None, Some(2), None];
        compact(&mut v, |_| true);
        assert_eq!(v, vec![Some(1), Some(2)]);
    }

    #[test]
    fn length_matches_predicate_count() {
        let input: Vec<Option<i32>> = vec![Some(-2), None, Some(5), Some(-7), Some(8), None];
        let expected = input.iter().flatten().filter(|n| **n > 0).count();
        let mut v = input.clone();
        compact(&mut v, |n| *n > 0);
        assert_eq!(v.len(), expected);
        assert!(v.iter().all(|e| e.is_some_and(|n| n > 0)));
    }

    #[test]
    fn keeps_the_backing_allocation() {
        let mut v: Vec<Option<u8>> = Vec::with_capacity(64);
        v.extend((0..64).map(Some));
        let ptr = v.as_ptr();
        compact(&mut v, |n| n % 2 == 1);
        assert_eq!(v.as_ptr(), ptr);
        assert_eq!(v.capacity(), 64);
        assert_eq!(v.len(), 32);
    }

    #[test]
    fn dropped_entries_release_their_references() {
        let shared = Rc::new(());
        let mut v = vec![Some(Rc::clone(&shared)), Some(Rc::clone(&shared)), None];
        assert_eq!(Rc::strong_count(&shared), 3);
        compact(&mut v, |_| false);
        assert!(v.is_empty());
        assert_eq!(Rc::strong_count(&shared), 1);
    }

    #[test]
    fn empty_input() {
        let mut v: Vec<Option<String>> = Vec::new();
        compact(&mut v, |_| true);
        assert!(v.is_empty());
    }
}
