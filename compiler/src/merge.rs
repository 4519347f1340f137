// merge.rs — Timeline merge engine
//
// Collapses independent per-channel toggle sequences into one ordered list
// of frames, each a duration plus the bitmask of channels that are ON.
//
// Boundaries are the union of every channel's cumulative toggle times. The
// frame ending at boundary `t` has a channel ON when an odd number of that
// channel's toggles lie strictly before `t` and the channel still has a
// toggle at or after `t`.
//
// Preconditions: each channel lists segment lengths, first segment OFF.
// Postconditions: no zero-duration frames; no two adjacent frames share a
//   mask; the total duration equals the longest channel.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::id::Channel;

/// One device state held for `duration` nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub duration: u64,
    /// Bit `c` set means channel `c` is ON.
    pub mask: u32,
}

/// Ordered frames covering the whole sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub frames: Vec<Frame>,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn total_ns(&self) -> u64 {
        self.frames.iter().map(|f| f.duration).sum()
    }

    pub fn durations(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.duration).collect()
    }

    pub fn masks(&self) -> Vec<u32> {
        self.frames.iter().map(|f| f.mask).collect()
    }

    /// Level of `channel` during the instant `[t, t+1)`. OFF past the end.
    pub fn level(&self, channel: Channel, t: u64) -> bool {
        let mut start = 0;
        for frame in &self.frames {
            let end = start + frame.duration;
            if t < end {
                return frame.mask & channel.bit() != 0;
            }
            start = end;
        }
        false
    }

    /// Append a frame, folding it into the previous one when masks match.
    fn push(&mut self, duration: u64, mask: u32) {
        if duration == 0 {
            return;
        }
        match self.frames.last_mut() {
            Some(last) if last.mask == mask => last.duration += duration,
            _ => self.frames.push(Frame { duration, mask }),
        }
    }
}

impl fmt::Display for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut start = 0;
        for frame in &self.frames {
            writeln!(
                f,
                "{start:>12} ns  [{:024b}]  {} ns",
                frame.mask, frame.duration
            )?;
            start += frame.duration;
        }
        Ok(())
    }
}

/// Merge per-channel toggle sequences into a timeline.
///
/// Channel `i` of `channels` drives bit `i` of every mask; at most
/// `Channel::COUNT` channels are read.
pub fn merge<S: AsRef<[u64]>>(channels: &[S]) -> Timeline {
    let cumulative: Vec<Vec<u64>> = channels
        .iter()
        .take(Channel::COUNT)
        .map(|seq| {
            seq.as_ref()
                .iter()
                .scan(0u64, |acc, d| {
                    *acc += d;
                    Some(*acc)
                })
                .collect()
        })
        .collect();

    let mut boundaries: Vec<u64> = cumulative.iter().flatten().copied().collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    // Per channel: number of toggles strictly before the current boundary.
    let mut before = vec![0usize; cumulative.len()];
    let mut timeline = Timeline::default();
    let mut previous = 0;
    for t in boundaries {
        let mut mask = 0u32;
        for (c, toggles) in cumulative.iter().enumerate() {
            let n = &mut before[c];
            while *n < toggles.len() && toggles[*n] < t {
                *n += 1;
            }
            if *n < toggles.len() && *n % 2 == 1 {
                mask |= 1 << c;
            }
        }
        timeline.push(t - previous, mask);
        previous = t;
    }
    timeline
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(i: usize) -> Channel {
        Channel::new(i).unwrap()
    }

    fn m(channels: &[&[u64]]) -> Timeline {
        merge(channels)
    }

    #[test]
    fn two_channel_overlap() {
        // Segment lengths in units of 100 ms.
        let tl = m(&[&[1, 3], &[3, 2]]);
        assert_eq!(tl.durations(), vec![1, 2, 1, 1]);
        assert_eq!(tl.masks(), vec![0b00, 0b01, 0b11, 0b10]);
        assert_eq!(tl.total_ns(), 5);
    }

    #[test]
    fn empty_input_gives_empty_timeline() {
        let channels: Vec<Vec<u64>> = vec![Vec::new(); Channel::COUNT];
        assert!(merge(&channels).is_empty());
        assert!(merge::<Vec<u64>>(&[]).is_empty());
    }

    #[test]
    fn zero_leading_segment_starts_on() {
        let tl = m(&[&[0, 50]]);
        assert_eq!(tl.frames, vec![Frame { duration: 50, mask: 1 }]);
    }

    #[test]
    fn zero_duration_frames_are_dropped() {
        // Both channels toggle at 10; the boundary is shared.
        let tl = m(&[&[10, 10], &[10, 0, 0, 10]]);
        assert!(tl.frames.iter().all(|f| f.duration > 0));
        assert_eq!(tl.total_ns(), 20);
    }

    #[test]
    fn adjacent_equal_masks_merge() {
        // Zero-length OFF gap inside an ON run.
        let tl = m(&[&[5, 10, 0, 10]]);
        assert_eq!(
            tl.frames,
            vec![
                Frame { duration: 5, mask: 0 },
                Frame { duration: 20, mask: 1 },
            ]
        );
    }

    #[test]
    fn channel_is_off_after_its_last_toggle() {
        let tl = m(&[&[10, 10], &[40]]);
        assert_eq!(tl.durations(), vec![10, 10, 20]);
        assert_eq!(tl.masks(), vec![0, 1, 0]);
    }

    #[test]
    fn high_channel_bits() {
        let mut channels: Vec<Vec<u64>> = vec![Vec::new(); Channel::COUNT];
        channels[23] = vec![0, 7];
        let tl = merge(&channels);
        assert_eq!(tl.frames, vec![Frame { duration: 7, mask: 1 << 23 }]);
    }

    #[test]
    fn level_decodes_instants() {
        let tl = m(&[&[1, 3], &[3, 2]]);
        assert!(!tl.level(ch(0), 0));
        assert!(tl.level(ch(0), 1));
        assert!(tl.level(ch(0), 3));
        assert!(!tl.level(ch(0), 4));
        assert!(tl.level(ch(1), 4));
        assert!(!tl.level(ch(1), 5));
    }
}
