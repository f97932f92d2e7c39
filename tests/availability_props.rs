//! Property tests for the multi-producer availability window

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use surge::disruptor::{BusySpinWaitStrategy, MultiProducerSequencer, Sequencer};

const SIZE: i64 = 16;

fn sequencer_with_publishes(published: &BTreeSet<i64>) -> MultiProducerSequencer {
    let sequencer =
        MultiProducerSequencer::new(SIZE as usize, Arc::new(BusySpinWaitStrategy::new())).unwrap();
    // Mark the whole first generation as claimed, then publish the subset
    sequencer.claim(SIZE - 1);
    for &sequence in published {
        sequencer.publish(sequence);
    }
    sequencer
}

proptest! {
    #[test]
    fn highest_published_is_the_contiguous_prefix(
        published in proptest::collection::btree_set(0..SIZE, 0..=SIZE as usize),
    ) {
        let sequencer = sequencer_with_publishes(&published);

        let prefix_len = (0..SIZE).take_while(|s| published.contains(s)).count() as i64;
        prop_assert_eq!(
            sequencer.highest_published_sequence(0, SIZE - 1),
            prefix_len - 1
        );
    }

    #[test]
    fn highest_published_respects_lower_bound(
        published in proptest::collection::btree_set(0..SIZE, 0..=SIZE as usize),
        lower in 0..SIZE,
    ) {
        let sequencer = sequencer_with_publishes(&published);

        let result = sequencer.highest_published_sequence(lower, SIZE - 1);
        prop_assert!(result >= lower - 1);
        prop_assert!(result < SIZE);
        for sequence in lower..=result {
            prop_assert!(sequencer.is_available(sequence));
        }
        if result < SIZE - 1 {
            prop_assert!(!sequencer.is_available(result + 1));
        }
    }

    #[test]
    fn availability_flags_distinguish_generations(
        published in proptest::collection::btree_set(0..SIZE, 1..=SIZE as usize),
    ) {
        let sequencer = sequencer_with_publishes(&published);

        for &sequence in &published {
            prop_assert!(sequencer.is_available(sequence));
            // The same slot one wrap later reads as unpublished
            prop_assert!(!sequencer.is_available(sequence + SIZE));
        }
    }
}
