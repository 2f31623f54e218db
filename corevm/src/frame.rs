use std::{mem, ops::Range, sync::Arc};

use crate::{Function, Value};

/// Width of one variable cell in bytes.
pub const SLOT_SIZE: usize = mem::size_of::<Value>();

/// Bytes a frame header occupies in the arena, rounded to whole cells.
pub const FRAME_HEADER_SIZE: usize = mem::size_of::<Frame>().next_multiple_of(SLOT_SIZE);

/// Fill counter of a committed frame: every slot counts as written.
pub const FILLED: usize = usize::MAX;

/// Index of a frame record in its stack's frame table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub(crate) usize);

impl FrameId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where a callee's result goes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Destination {
    #[default]
    Discard,
    Variable { frame: FrameId, index: usize },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameState {
    /// Arguments are still being produced, only `filled` slots hold data.
    Reserved { filled: usize },
    Committed,
}

/// One activation record.
///
/// The header lives in the stack's frame table, the variables live in the
/// arena window `slots`, which is fixed when the frame is reserved.
#[derive(Debug, Clone)]
pub struct Frame {
    pub context: Value,
    /// caller's committed frame, `None` is the bottom sentinel
    pub return_link: Option<FrameId>,
    /// innermost reserved frame at the time this one was reserved
    pub return_future: Option<FrameId>,
    /// instruction offset, `None` while running native code
    pub resume: Option<usize>,
    pub destination: Destination,
    pub function: Arc<Function>,
    pub state: FrameState,
    /// byte offset of the frame in the arena
    pub(crate) address: usize,
    pub(crate) slots: Range<usize>,
}

impl Frame {
    /// Number of slots written so far, [`FILLED`] once committed.
    #[inline]
    #[must_use]
    pub fn filled(&self) -> usize {
        match self.state {
            FrameState::Reserved { filled } => filled,
            FrameState::Committed => FILLED,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.state == FrameState::Committed
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub fn address(&self) -> usize {
        self.address
    }

    /// Bytes the frame occupies in the arena, header included.
    #[must_use]
    pub fn footprint(&self) -> usize {
        frame_footprint(self.size())
    }
}

#[inline]
#[must_use]
pub fn frame_footprint(size: usize) -> usize {
    FRAME_HEADER_SIZE + size * SLOT_SIZE
}

/// [`frame_footprint`] for untrusted sizes, `None` if it does not fit a
/// `usize`.
#[inline]
#[must_use]
pub fn checked_frame_footprint(size: usize) -> Option<usize> {
    size.checked_mul(SLOT_SIZE)?.checked_add(FRAME_HEADER_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LivenessTable;

    fn frame(state: FrameState) -> Frame {
        Frame {
            context: Value::zero(),
            return_link: None,
            return_future: None,
            resume: None,
            destination: Destination::Discard,
            function: Function::native("f", 3, LivenessTable::default()),
            state,
            address: 0,
            slots: 4..7,
        }
    }

    #[test]
    fn header_size_is_whole_cells() {
        assert_eq!(FRAME_HEADER_SIZE % SLOT_SIZE, 0);
        assert!(FRAME_HEADER_SIZE >= mem::size_of::<Frame>());
    }

    #[test]
    fn reserved_frames_report_their_fill_counter() {
        let f = frame(FrameState::Reserved { filled: 2 });
        assert_eq!(f.filled(), 2);
        assert!(!f.is_committed());
    }

    #[test]
    fn committed_frames_are_filled() {
        let f = frame(FrameState::Committed);
        assert_eq!(f.filled(), FILLED);
        assert_eq!(f.size(), 3);
        assert_eq!(f.footprint(), FRAME_HEADER_SIZE + 3 * SLOT_SIZE);
    }
}
