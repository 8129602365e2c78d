//! Global lock ordering for account rows.
//!
//! Any transaction that locks two accounts locks the lower ID first. Two
//! transfers over the same pair, in either direction, then request locks
//! in the same sequence and can never wait on each other in a cycle.

use simplebank_common::AccountId;

/// Order two account IDs for lock acquisition: ascending numeric ID.
pub fn order_for_access(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_lower_id_first() {
        let a = AccountId::new(1);
        let b = AccountId::new(2);
        assert_eq!(order_for_access(a, b), (a, b));
        assert_eq!(order_for_access(b, a), (a, b));
    }

    #[test]
    fn test_negative_ids_order_numerically() {
        let a = AccountId::new(-5);
        let b = AccountId::new(3);
        assert_eq!(order_for_access(b, a), (a, b));
    }

    proptest! {
        #[test]
        fn prop_order_is_symmetric(a in any::<i64>(), b in any::<i64>()) {
            let (a, b) = (AccountId::new(a), AccountId::new(b));
            prop_assert_eq!(order_for_access(a, b), order_for_access(b, a));
        }

        #[test]
        fn prop_order_is_ascending_permutation(a in any::<i64>(), b in any::<i64>()) {
            let (a, b) = (AccountId::new(a), AccountId::new(b));
            let (first, second) = order_for_access(a, b);
            prop_assert!(first <= second);
            prop_assert!((first, second) == (a, b) || (first, second) == (b, a));
        }
    }
}
