use std::sync::Arc;

use crate::{
    Destination, FRAME_HEADER_SIZE, Fault, Frame, FrameId, FrameState,
    Function, SLOT_SIZE, Value, checked_frame_footprint,
};

/// Room for ten thousand frames of ten variables each.
pub const DEFAULT_STACK_SIZE: usize = (FRAME_HEADER_SIZE + 10 * SLOT_SIZE) * 10_000;

#[derive(Debug, Clone, Default)]
pub struct StackCreateInfo {
    /// arena size in bytes, rounded down to whole cells
    pub size: Option<usize>,
}

/// Per-thread call stack.
///
/// Frames are carved off a fixed arena from the top towards offset 0, which
/// is the floor. `current` is the innermost committed frame, `future` the
/// innermost reserved one. Both are `None` at the bottom sentinel.
///
/// Pushing is two-phase: [`Stack::reserve`] makes room and links the frame
/// into the chain the collector walks, but with a fill counter of zero, so
/// none of its slots are treated as roots. Arguments are written one after
/// another, each advancing the counter, and [`Stack::commit`] finally makes
/// the frame the current one. A collection triggered while an argument is
/// produced therefore never sees uninitialized slots.
#[derive(Debug)]
pub struct Stack {
    cells: Box<[Value]>,
    frames: Vec<Frame>,
    current: Option<FrameId>,
    future: Option<FrameId>,
    capacity: usize,
}

impl Stack {
    pub fn new(info: &StackCreateInfo) -> Result<Self, Fault> {
        let size = info.size.unwrap_or(DEFAULT_STACK_SIZE);
        let capacity = size - size % SLOT_SIZE;
        let cell_count = capacity / SLOT_SIZE;

        let mut cells = Vec::new();
        cells
            .try_reserve_exact(cell_count)
            .map_err(|_| Fault::ArenaAllocation { size })?;
        cells.resize(cell_count, Value::zero());

        // every frame takes at least a header, so the table never grows
        let mut frames = Vec::new();
        frames
            .try_reserve_exact(capacity / FRAME_HEADER_SIZE)
            .map_err(|_| Fault::ArenaAllocation { size })?;

        Ok(Self {
            cells: cells.into_boxed_slice(),
            frames,
            current: None,
            future: None,
            capacity,
        })
    }

    /// Arena size in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes between the floor and the innermost reserved frame.
    #[must_use]
    pub fn available(&self) -> usize {
        self.future_address()
    }

    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.capacity - self.future_address()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.future.is_none()
    }

    #[must_use]
    pub fn current(&self) -> Option<FrameId> {
        self.current
    }

    #[must_use]
    pub fn future(&self) -> Option<FrameId> {
        self.future
    }

    #[inline]
    fn future_address(&self) -> usize {
        self.future
            .map_or(self.capacity, |id| self.frames[id.0].address)
    }

    /// Makes room for a frame below the innermost reserved one.
    ///
    /// The frame becomes part of the walkable chain with nothing filled in,
    /// but does not become current until [`Stack::commit`].
    pub fn reserve(
        &mut self,
        context: Value,
        size: usize,
        function: Arc<Function>,
        destination: Destination,
        resume: Option<usize>,
    ) -> Result<FrameId, Fault> {
        let top = self.future_address();
        // a footprint beyond the address space is below any floor
        let requested = checked_frame_footprint(size).unwrap_or(usize::MAX);
        let Some(address) = top.checked_sub(requested) else {
            return Err(Fault::StackOverflow {
                requested,
                available: top,
            });
        };

        let start = (address + FRAME_HEADER_SIZE) / SLOT_SIZE;
        let slots = start..start + size;
        self.cells[slots.clone()].fill(Value::zero());

        let id = FrameId(self.frames.len());
        log::trace!(
            "reserve frame {} for {} at {address} ({size} slots)",
            id.0,
            function.name()
        );
        self.frames.push(Frame {
            context,
            return_link: self.current,
            return_future: self.future,
            resume,
            destination,
            function,
            state: FrameState::Reserved { filled: 0 },
            address,
            slots,
        });
        self.future = Some(id);
        Ok(id)
    }

    /// Makes the reserved frame the current one.
    pub fn commit(&mut self) {
        let id = self.future.expect("no reserved frame to commit");
        let frame = &mut self.frames[id.0];
        assert!(!frame.is_committed(), "frame {} is already committed", id.0);
        frame.state = FrameState::Committed;
        self.current = Some(id);
        log::trace!("commit frame {}", id.0);
    }

    /// Appends `values` to the arguments of the reserved frame `id` and
    /// advances its fill counter by their width.
    pub fn write_arguments(&mut self, id: FrameId, values: &[Value]) {
        let frame = &mut self.frames[id.0];
        let FrameState::Reserved { filled } = frame.state else {
            panic!("frame {} is not accepting arguments", id.0);
        };
        let end = filled + values.len();
        assert!(
            end <= frame.size(),
            "arguments overflow frame {} ({end} > {})",
            id.0,
            frame.size()
        );
        let start = frame.slots.start + filled;
        self.cells[start..start + values.len()].copy_from_slice(values);
        frame.state = FrameState::Reserved { filled: end };
    }

    /// Reserves a frame, fills it by calling `produce` once per argument and
    /// commits it.
    ///
    /// `produce` gets the stack itself, it may call further functions or
    /// trigger a collection, and leaves the argument's cells in the buffer.
    /// Multi-cell values simply leave more than one cell. If `produce`
    /// fails the reserved frame is dropped again.
    #[allow(clippy::too_many_arguments)]
    pub fn push_with_arguments<F>(
        &mut self,
        context: Value,
        size: usize,
        arg_count: usize,
        function: Arc<Function>,
        destination: Destination,
        resume: Option<usize>,
        mut produce: F,
    ) -> Result<FrameId, Fault>
    where
        F: FnMut(&mut Stack, &mut Vec<Value>) -> Result<(), Fault>,
    {
        let id = self.reserve(context, size, function, destination, resume)?;
        let mut buffer = Vec::new();
        for _ in 0..arg_count {
            buffer.clear();
            if let Err(fault) = produce(self, &mut buffer) {
                self.release(id);
                return Err(fault);
            }
            assert_eq!(
                self.future,
                Some(id),
                "argument producer left frames behind"
            );
            self.write_arguments(id, &buffer);
        }
        self.commit();
        Ok(id)
    }

    /// Pushes a frame with already evaluated single-cell arguments, sized by
    /// the function's declaration.
    pub fn push(
        &mut self,
        context: Value,
        function: Arc<Function>,
        destination: Destination,
        resume: Option<usize>,
        arguments: &[Value],
    ) -> Result<FrameId, Fault> {
        let size = function.frame_size();
        let id = self.reserve(context, size, function, destination, resume)?;
        self.write_arguments(id, arguments);
        self.commit();
        Ok(id)
    }

    /// Drops a reserved frame and everything above it, restoring the state
    /// from right before it was reserved.
    fn release(&mut self, id: FrameId) {
        let frame = &self.frames[id.0];
        self.current = frame.return_link;
        self.future = frame.return_future;
        self.frames.truncate(id.0);
        log::trace!("release frame {}", id.0);
    }

    /// Returns from the current frame.
    ///
    /// The space is not cleared, the next reservation simply reuses it.
    pub fn pop(&mut self) -> Frame {
        let id = self.current.expect("popping empty stack");
        self.frames.truncate(id.0 + 1);
        let frame = self.frames.pop().expect("current frame exists");
        self.current = frame.return_link;
        self.future = frame.return_future;
        log::trace!("pop frame {} ({})", id.0, frame.function.name());
        frame
    }

    /// Stores `value` at the current frame's destination and pops it.
    pub fn return_value(&mut self, value: Value) -> Frame {
        let frame = self.pop();
        if let Destination::Variable { frame: target, index } =
            frame.destination
        {
            self.set_variable(target, index, value);
        }
        frame
    }

    #[must_use]
    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0]
    }

    #[must_use]
    pub fn current_frame(&self) -> Option<&Frame> {
        self.current.map(|id| &self.frames[id.0])
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        let id = self.current.expect("no frame on the stack");
        &mut self.frames[id.0]
    }

    #[must_use]
    pub fn current_context(&self) -> Value {
        self.current_frame().expect("no frame on the stack").context
    }

    #[must_use]
    pub fn current_variable(&self, index: usize) -> Value {
        let id = self.current.expect("no frame on the stack");
        self.variable(id, index)
    }

    pub fn set_current_variable(&mut self, index: usize, value: Value) {
        let id = self.current.expect("no frame on the stack");
        self.set_variable(id, index, value);
    }

    /// Updates the instruction offset of the current frame.
    pub fn set_resume(&mut self, resume: Option<usize>) {
        self.current_frame_mut().resume = resume;
    }

    #[must_use]
    pub fn variables(&self, id: FrameId) -> &[Value] {
        &self.cells[self.frames[id.0].slots.clone()]
    }

    pub fn variables_mut(&mut self, id: FrameId) -> &mut [Value] {
        &mut self.cells[self.frames[id.0].slots.clone()]
    }

    #[must_use]
    pub fn variable(&self, id: FrameId, index: usize) -> Value {
        let variables = self.variables(id);
        assert!(
            index < variables.len(),
            "variable {index} out of range for frame {} of size {}",
            id.0,
            variables.len()
        );
        variables[index]
    }

    pub fn set_variable(&mut self, id: FrameId, index: usize, value: Value) {
        let variables = self.variables_mut(id);
        assert!(
            index < variables.len(),
            "variable {index} out of range for frame {} of size {}",
            id.0,
            variables.len()
        );
        variables[index] = value;
    }

    /// Frames in the order the collector walks them: innermost reserved
    /// frame first, then down the saved future links.
    pub fn frames(&self) -> impl Iterator<Item = (FrameId, &Frame)> + '_ {
        std::iter::successors(self.future, |id| {
            self.frames[id.0].return_future
        })
        .map(|id| (id, &self.frames[id.0]))
    }

    /// Committed frames from the current one down to the bottom.
    pub fn call_chain(
        &self,
    ) -> impl Iterator<Item = (FrameId, &Frame)> + '_ {
        std::iter::successors(self.current, |id| {
            self.frames[id.0].return_link
        })
        .map(|id| (id, &self.frames[id.0]))
    }

    /// Number of committed frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.call_chain().count()
    }

    /// Frame headers and the arena cells, split for the root scanner.
    pub(crate) fn scan_parts(
        &mut self,
    ) -> (Option<FrameId>, &[Frame], &mut [Value]) {
        (self.future, &self.frames[..], &mut self.cells[..])
    }
}
