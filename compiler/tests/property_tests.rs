// Property-based tests for merge and concatenation invariants.
//
// 1. Merge decoding: every channel reads back from the timeline at every instant
// 2. Timeline shape: no zero frames, no repeated masks, total = longest channel
// 3. Concatenation: length additivity and the empty identity
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use plsc::id::Channel;
use plsc::merge::merge;
use plsc::sequence::RawSequence;
use proptest::prelude::*;

// ── Generators ──────────────────────────────────────────────────────────────

/// Up to four channels of up to six segments each, zero lengths included.
fn arb_channels() -> impl Strategy<Value = Vec<Vec<u64>>> {
    prop::collection::vec(prop::collection::vec(0u64..40, 0..=6), 1..=4)
}

fn arb_raw() -> impl Strategy<Value = RawSequence> {
    arb_channels().prop_map(|channels| {
        RawSequence::from_channels(
            channels
                .into_iter()
                .enumerate()
                .map(|(i, segments)| (Channel::new(i).unwrap(), segments)),
        )
    })
}

/// Direct reading of one toggle list: ON inside odd-numbered segments.
fn level_at(segments: &[u64], t: u64) -> bool {
    let mut end = 0;
    for (i, len) in segments.iter().enumerate() {
        end += len;
        if t < end {
            return i % 2 == 1;
        }
    }
    false
}

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    }
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(config())]

    #[test]
    fn merged_levels_match_each_channel(channels in arb_channels()) {
        let timeline = merge(&channels);
        let horizon = channels.iter().map(|c| c.iter().sum::<u64>()).max().unwrap_or(0);
        for (i, segments) in channels.iter().enumerate() {
            let channel = Channel::new(i).unwrap();
            for t in 0..=horizon {
                prop_assert_eq!(
                    timeline.level(channel, t),
                    level_at(segments, t),
                    "channel {} at t={}", i, t
                );
            }
        }
    }

    #[test]
    fn timeline_is_canonical(channels in arb_channels()) {
        let timeline = merge(&channels);
        prop_assert!(timeline.frames.iter().all(|f| f.duration > 0));
        prop_assert!(timeline.frames.windows(2).all(|w| w[0].mask != w[1].mask));
        let longest = channels.iter().map(|c| c.iter().sum::<u64>()).max().unwrap_or(0);
        prop_assert_eq!(timeline.total_ns(), longest);
        prop_assert_eq!(merge(&channels), timeline);
    }

    #[test]
    fn concatenation_lengths_add(a in arb_raw(), b in arb_raw()) {
        let joined = &a + &b;
        prop_assert_eq!(joined.length_ns(), a.length_ns() + b.length_ns());
    }

    #[test]
    fn empty_sequence_is_identity(a in arb_raw()) {
        prop_assert_eq!(&RawSequence::default() + &a, a.clone());
        prop_assert_eq!(&a + &RawSequence::default(), a);
    }

    #[test]
    fn concatenation_preserves_the_prefix(a in arb_raw(), b in arb_raw()) {
        prop_assume!(!a.is_empty() && !b.is_empty());
        let split = a.length_ns();
        let joined = (&a + &b).timeline();
        let head = a.timeline();
        for i in 0..Channel::COUNT {
            let channel = Channel::new(i).unwrap();
            for t in 0..split {
                prop_assert_eq!(joined.level(channel, t), head.level(channel, t));
            }
        }
    }
}
