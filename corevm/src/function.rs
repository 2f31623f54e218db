use std::sync::Arc;

/// One compiled instruction word, opaque to this crate.
pub type Instruction = u32;

/// Says that `variable` may hold a live reference while the frame's resume
/// offset lies within `from..=to`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LivenessRecord {
    pub from: usize,
    pub to: usize,
    pub variable: usize,
}

impl LivenessRecord {
    #[must_use]
    pub const fn new(from: usize, to: usize, variable: usize) -> Self {
        Self { from, to, variable }
    }

    #[inline]
    #[must_use]
    pub fn covers(&self, offset: usize) -> bool {
        self.from <= offset && offset <= self.to
    }
}

/// Liveness records of a single function, in compiler order.
///
/// The index of a record is stable and handed to the collector together with
/// the slot, so the collector can map it back to type information.
#[derive(Debug, Clone, Default)]
pub struct LivenessTable {
    records: Box<[LivenessRecord]>,
}

impl LivenessTable {
    #[must_use]
    pub fn new(records: Vec<LivenessRecord>) -> Self {
        Self {
            records: records.into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn records(&self) -> &[LivenessRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records covering `offset`, paired with their index.
    /// A native frame has no offset and is looked up at the entry, offset 0.
    pub fn live_at(
        &self,
        offset: Option<usize>,
    ) -> impl Iterator<Item = (usize, &LivenessRecord)> + '_ {
        let offset = offset.unwrap_or(0);
        self.records
            .iter()
            .enumerate()
            .filter(move |(_, record)| record.covers(offset))
    }
}

/// Compiler output for one function as far as the stack is concerned.
#[derive(Debug)]
pub struct Function {
    name: String,
    frame_size: usize,
    instructions: Box<[Instruction]>,
    liveness: LivenessTable,
}

impl Function {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        frame_size: usize,
        instructions: Vec<Instruction>,
        liveness: LivenessTable,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            frame_size,
            instructions: instructions.into_boxed_slice(),
            liveness,
        })
    }

    /// A function without bytecode, used for native frames.
    #[must_use]
    pub fn native(
        name: impl Into<String>,
        frame_size: usize,
        liveness: LivenessTable,
    ) -> Arc<Self> {
        Self::new(name, frame_size, Vec::new(), liveness)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of variable cells, arguments included.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[must_use]
    pub fn liveness(&self) -> &LivenessTable {
        &self.liveness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LivenessTable {
        LivenessTable::new(vec![
            LivenessRecord::new(0, 0, 0),
            LivenessRecord::new(0, 10, 1),
            LivenessRecord::new(4, 8, 2),
            LivenessRecord::new(9, 9, 3),
        ])
    }

    #[test]
    fn ranges_are_inclusive_on_both_ends() {
        let record = LivenessRecord::new(4, 8, 0);
        assert!(!record.covers(3));
        assert!(record.covers(4));
        assert!(record.covers(8));
        assert!(!record.covers(9));
    }

    #[test]
    fn live_at_reports_record_indices() {
        let table = table();
        let live: Vec<usize> =
            table.live_at(Some(9)).map(|(index, _)| index).collect();
        assert_eq!(live, vec![1, 3]);
    }

    #[test]
    fn native_frames_use_the_entry_range() {
        let table = table();
        let live: Vec<usize> =
            table.live_at(None).map(|(_, r)| r.variable).collect();
        assert_eq!(live, vec![0, 1]);
    }

    #[test]
    fn functions_carry_their_compiled_metadata() {
        let f = Function::new("f", 4, vec![7, 8, 9], table());
        assert_eq!(f.name(), "f");
        assert_eq!(f.frame_size(), 4);
        assert_eq!(f.instructions(), &[7, 8, 9]);
        assert_eq!(f.liveness().len(), 4);

        let native = Function::native("n", 2, LivenessTable::default());
        assert!(native.instructions().is_empty());
    }

    #[test]
    fn offsets_past_every_range_yield_nothing() {
        let table = table();
        assert_eq!(table.live_at(Some(usize::MAX)).count(), 0);
    }
}
