//! Property tests for endpoint selection.
//!
//! Invariants tested:
//! - Round-robin visits every endpoint equally, starting with the first
//! - The connected endpoint is always the one last attempted
//! - Custom selectors can never index out of range

use artemis_client_recovery::{Endpoint, EndpointSelector, SelectionStrategy};
use proptest::prelude::*;
use std::sync::Arc;

fn endpoints(count: usize) -> Vec<Endpoint> {
    (0..count)
        .map(|i| Endpoint::new(format!("host{}", i), 5672))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: Round-robin cycles through the list in order
    #[test]
    fn round_robin_cycles_in_order(
        count in 1usize..=8,
        rounds in 1usize..=5,
    ) {
        let list = endpoints(count);
        let selector = EndpointSelector::new(list.clone()).unwrap();

        for call in 0..count * rounds {
            prop_assert_eq!(selector.next(), list[call % count].clone());
        }
    }

    /// Property: After `first`, round-robin continues with the second endpoint
    #[test]
    fn first_then_next_moves_on(count in 1usize..=8) {
        let list = endpoints(count);
        let selector = EndpointSelector::new(list.clone()).unwrap();

        prop_assert_eq!(selector.first(), list[0].clone());
        prop_assert_eq!(selector.next(), list[1 % count].clone());
    }

    /// Property: The connected endpoint is the one last attempted
    #[test]
    fn connected_tracks_last_attempt(
        count in 1usize..=8,
        calls in 1usize..=20,
    ) {
        let selector = EndpointSelector::new(endpoints(count)).unwrap();
        prop_assert!(selector.connected().is_none());

        for _ in 0..calls {
            selector.next();
        }
        selector.mark_connected();
        prop_assert_eq!(selector.connected(), selector.last_attempted());

        selector.mark_disconnected();
        prop_assert!(selector.connected().is_none());
        prop_assert!(selector.last_attempted().is_some());
    }

    /// Property: Custom selector results wrap into range
    #[test]
    fn custom_selector_wraps(
        count in 1usize..=8,
        pick in any::<usize>(),
    ) {
        let list = endpoints(count);
        let selector = EndpointSelector::with_strategy(
            list.clone(),
            SelectionStrategy::Custom(Arc::new(move |_, _| pick)),
        )
        .unwrap();

        prop_assert_eq!(selector.next(), list[pick % count].clone());
    }
}

#[test]
fn empty_list_is_rejected() {
    assert!(EndpointSelector::new(Vec::new()).is_err());
}
