// id.rs — Channel and programmer identifiers
//
// `Channel` is the validated index of one binary output line; its bit in a
// frame mask is `1 << index`. `ProgrammerId` identifies the holder of a
// board's programming mode and is allocated monotonically by the board.

use std::fmt;

use serde::Serialize;

/// One output channel of the pulse sequencer (0..24).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Channel(u8);

impl Channel {
    /// Number of addressable channels on the device.
    pub const COUNT: usize = 24;

    /// Validate a raw index.
    pub fn new(index: usize) -> Option<Self> {
        (index < Self::COUNT).then(|| Channel(index as u8))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Bit for this channel in a frame mask (channel 0 = least significant).
    pub fn bit(self) -> u32 {
        1 << self.0
    }

    /// All channels in ascending order.
    pub fn all() -> impl Iterator<Item = Channel> {
        (0..Self::COUNT as u8).map(Channel)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies whoever holds a board's programming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgrammerId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_range_is_validated() {
        assert_eq!(Channel::new(0).map(Channel::index), Some(0));
        assert_eq!(Channel::new(23).map(Channel::index), Some(23));
        assert!(Channel::new(24).is_none());
    }

    #[test]
    fn channel_bits() {
        assert_eq!(Channel::new(0).unwrap().bit(), 1);
        assert_eq!(Channel::new(7).unwrap().bit(), 0b1000_0000);
        assert_eq!(Channel::all().count(), Channel::COUNT);
    }
}
