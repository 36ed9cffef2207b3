//! Property tests for `reorder_map`.

use proptest::prelude::*;

use crate::fusion::reorder_map;

use super::generators::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// The result is always a permutation of `0..rank`.
    #[test]
    fn reorder_is_permutation((rank, old2new) in arb_reorder()) {
        let mut new2old = reorder_map(rank, &old2new).unwrap();
        new2old.sort_unstable();
        prop_assert_eq!(new2old, (0..rank).collect::<Vec<_>>());
    }

    /// Every explicit entry lands where it was asked to.
    #[test]
    fn reorder_honors_explicit_entries((rank, old2new) in arb_reorder()) {
        let new2old = reorder_map(rank, &old2new).unwrap();
        let r = rank as i64;
        for &(old, new) in &old2new {
            let (old, new) = (old.rem_euclid(r) as usize, new.rem_euclid(r) as usize);
            prop_assert_eq!(new2old[new], old);
        }
    }

    /// Unmapped axes keep their relative order.
    #[test]
    fn reorder_keeps_unmapped_order((rank, old2new) in arb_reorder()) {
        let new2old = reorder_map(rank, &old2new).unwrap();
        let r = rank as i64;
        let mapped: Vec<usize> = old2new.iter().map(|&(old, _)| old.rem_euclid(r) as usize).collect();
        let unmapped: Vec<usize> = new2old.into_iter().filter(|old| !mapped.contains(old)).collect();
        prop_assert!(unmapped.windows(2).all(|w| w[0] < w[1]));
    }
}
