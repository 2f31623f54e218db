//! Locating roots on thread stacks.
//!
//! The walk starts at the innermost *reserved* frame, not the current one,
//! so frames whose arguments are still being produced are scanned too. Only
//! slots below a frame's fill counter are ever handed to the collector.

use std::ops::AddAssign;

use crate::{Stack, ThreadRegistry, Visitable, Visitor};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub threads: usize,
    pub frames: usize,
    pub roots: usize,
}

impl AddAssign for ScanStats {
    fn add_assign(&mut self, other: Self) {
        self.threads += other.threads;
        self.frames += other.frames;
        self.roots += other.roots;
    }
}

/// Reports every live reference slot of `stack` to `visitor`.
///
/// A frame's slot is live if a liveness record of its function covers the
/// frame's resume offset (offset 0 for native frames) and the slot has
/// already been written.
pub fn scan(stack: &mut Stack, visitor: &mut impl Visitor) -> ScanStats {
    let (future, frames, cells) = stack.scan_parts();
    let mut stats = ScanStats {
        threads: 1,
        ..ScanStats::default()
    };

    let mut cursor = future;
    while let Some(id) = cursor {
        let frame = &frames[id.index()];
        let filled = frame.filled();
        let variables = &mut cells[frame.slots.clone()];

        for (index, record) in frame.function.liveness().live_at(frame.resume)
        {
            if record.variable >= filled {
                continue;
            }
            let Some(slot) = variables.get_mut(record.variable) else {
                debug_assert!(
                    false,
                    "liveness record {index} of {} names slot {} of {}",
                    frame.function.name(),
                    record.variable,
                    variables.len()
                );
                continue;
            };
            visitor.visit_root(slot, index);
            stats.roots += 1;
        }

        stats.frames += 1;
        cursor = frame.return_future;
    }

    log::trace!(
        "scanned {} frames, {} roots",
        stats.frames,
        stats.roots
    );
    stats
}

impl Visitable for Stack {
    fn visit_edges_mut(&mut self, visitor: &mut impl Visitor) {
        scan(self, visitor);
    }
}

/// Scans the stacks of all threads in `registry`.
///
/// # Safety
/// The world must be stopped: no registered thread may push, pop or write
/// a variable until this returns, and no other scan may run concurrently.
pub unsafe fn scan_all(
    registry: &ThreadRegistry,
    visitor: &mut impl Visitor,
) -> ScanStats {
    let mut stats = ScanStats::default();
    for thread in registry.threads() {
        // SAFETY: caller guarantees the owner is stopped
        let stack = unsafe { thread.stack_mut() };
        stats += scan(stack, visitor);
    }
    log::debug!(
        "root scan: {} threads, {} frames, {} roots",
        stats.threads,
        stats.frames,
        stats.roots
    );
    stats
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use super::*;
    use crate::{
        Destination, Function, LivenessRecord, LivenessTable, MarkFn,
        OrAbort, StackCreateInfo, Thread, ThreadCreateInfo, Value, spawn,
    };

    #[derive(Default)]
    struct CollectVisitor {
        visited: Vec<(Value, usize)>,
    }

    impl Visitor for CollectVisitor {
        fn visit_mut(&mut self, slot: &mut Value) {
            self.visited.push((*slot, usize::MAX));
        }

        fn visit_root(&mut self, slot: &mut Value, record: usize) {
            self.visited.push((*slot, record));
        }
    }

    fn object(n: u64) -> Value {
        Value::from_address(n * 16)
    }

    fn stack() -> Stack {
        Stack::new(&StackCreateInfo { size: Some(8192) }).or_abort()
    }

    /// 4 slots: 0 and 1 live from the entry, 2 only in 5..=9, 3 never
    fn function() -> Arc<Function> {
        Function::new(
            "f",
            4,
            vec![0; 12],
            LivenessTable::new(vec![
                LivenessRecord::new(0, 11, 0),
                LivenessRecord::new(0, 11, 1),
                LivenessRecord::new(5, 9, 2),
            ]),
        )
    }

    #[test]
    fn committed_frames_yield_one_visit_per_covering_record() {
        let mut stack = stack();
        let args = [object(1), object(2), object(3), object(4)];
        stack
            .push(Value::zero(), function(), Destination::Discard, Some(6), &args)
            .or_abort();

        let mut visitor = CollectVisitor::default();
        let stats = scan(&mut stack, &mut visitor);

        assert_eq!(
            visitor.visited,
            vec![(object(1), 0), (object(2), 1), (object(3), 2)]
        );
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.roots, 3);
    }

    #[test]
    fn records_outside_the_resume_offset_are_skipped() {
        let mut stack = stack();
        let args = [object(1), object(2), object(3)];
        stack
            .push(Value::zero(), function(), Destination::Discard, Some(10), &args)
            .or_abort();

        let mut visitor = CollectVisitor::default();
        scan(&mut stack, &mut visitor);
        assert_eq!(visitor.visited, vec![(object(1), 0), (object(2), 1)]);
    }

    #[test]
    fn native_frames_are_scanned_at_the_entry() {
        let mut stack = stack();
        let args = [object(1), object(2), object(3)];
        stack
            .push(Value::zero(), function(), Destination::Discard, None, &args)
            .or_abort();

        let mut visitor = CollectVisitor::default();
        scan(&mut stack, &mut visitor);
        assert_eq!(visitor.visited, vec![(object(1), 0), (object(2), 1)]);
    }

    #[test]
    fn reserved_frames_never_expose_unfilled_slots() {
        let mut stack = stack();
        let caller = stack
            .push(Value::zero(), function(), Destination::Discard, Some(6), &[
                object(1),
                object(2),
                object(3),
            ])
            .or_abort();

        let mut during = Vec::new();
        stack
            .push_with_arguments(
                Value::zero(),
                4,
                3,
                function(),
                Destination::Discard,
                Some(6),
                |stack, buffer| {
                    // a collection happening while the argument is produced
                    let mut visitor = CollectVisitor::default();
                    scan(stack, &mut visitor);
                    during.push(visitor.visited);
                    buffer.push(object(10 + during.len() as u64));
                    Ok(())
                },
            )
            .or_abort();

        let caller_roots = vec![(object(1), 0), (object(2), 1), (object(3), 2)];
        // nothing filled, only the caller
        assert_eq!(during[0], caller_roots);
        // first argument written
        let mut expected = vec![(object(11), 0)];
        expected.extend(caller_roots.iter().copied());
        assert_eq!(during[1], expected);
        // two arguments, slot 2 still unfilled although record 2 covers it
        let mut expected = vec![(object(11), 0), (object(12), 1)];
        expected.extend(caller_roots.iter().copied());
        assert_eq!(during[2], expected);

        assert_eq!(stack.frame(caller).return_link, None);
    }

    #[test]
    fn the_walk_reaches_the_bottom_through_nested_reservations() {
        let mut stack = stack();
        let f = function();
        stack
            .push(Value::zero(), f.clone(), Destination::Discard, None, &[
                object(1),
            ])
            .or_abort();
        let reserved = stack
            .reserve(Value::zero(), 4, f.clone(), Destination::Discard, None)
            .or_abort();
        stack.write_arguments(reserved, &[object(2)]);
        stack
            .push(Value::zero(), f, Destination::Discard, None, &[object(3)])
            .or_abort();

        let mut visitor = CollectVisitor::default();
        let stats = scan(&mut stack, &mut visitor);
        assert_eq!(stats.frames, 3);
        // committed frames report slot 1 as well, it holds a fixnum zero
        assert_eq!(
            visitor.visited,
            vec![
                (object(3), 0),
                (Value::zero(), 1),
                (object(2), 0),
                (object(1), 0),
                (Value::zero(), 1),
            ]
        );
    }

    #[test]
    fn collectors_may_relocate_roots() {
        let mut stack = stack();
        stack
            .push(Value::zero(), function(), Destination::Discard, None, &[
                object(1),
                object(2),
            ])
            .or_abort();

        let mut relocate = MarkFn(|slot: &mut Value, _record: usize| {
            let address = slot.as_address().expect("reference");
            *slot = Value::from_address(address + 0x1000);
        });
        stack.visit_edges_mut(&mut relocate);

        assert_eq!(stack.current_variable(0), object(1 + 0x100));
        assert_eq!(stack.current_variable(1), object(2 + 0x100));
    }

    #[test]
    fn empty_stacks_have_no_roots() {
        let mut stack = stack();
        let mut visitor = CollectVisitor::default();
        assert_eq!(scan(&mut stack, &mut visitor).roots, 0);
        assert!(visitor.visited.is_empty());
    }

    #[test]
    fn scan_all_covers_every_stopped_thread() {
        let registry = Arc::new(ThreadRegistry::new());
        let workers = 4;
        let parked = Arc::new(Barrier::new(workers + 1));
        let resumed = Arc::new(Barrier::new(workers + 1));

        let handles: Vec<_> = (0..workers)
            .map(|w| {
                let parked = parked.clone();
                let resumed = resumed.clone();
                spawn(
                    &registry,
                    ThreadCreateInfo {
                        name: Some(format!("mutator-{w}")),
                        stack: StackCreateInfo { size: Some(8192) },
                    },
                    move |thread: &mut Thread| {
                        let stack = thread.stack_mut();
                        for depth in 0..=w {
                            stack
                                .push(
                                    Value::zero(),
                                    function(),
                                    Destination::Discard,
                                    None,
                                    &[object(depth as u64 + 1)],
                                )
                                .or_abort();
                        }
                        parked.wait();
                        resumed.wait();
                        stack.depth()
                    },
                )
                .or_abort()
            })
            .collect();

        parked.wait();
        let mut visitor = CollectVisitor::default();
        // SAFETY: every mutator waits on the barrier until we are done
        let stats = unsafe { scan_all(&registry, &mut visitor) };
        resumed.wait();

        assert_eq!(stats.threads, workers);
        // worker w pushed w + 1 frames, each with two entry records
        let frames: usize = (1..=workers).sum();
        assert_eq!(stats.frames, frames);
        assert_eq!(stats.roots, 2 * frames);
        let references =
            visitor.visited.iter().filter(|(v, _)| v.is_object()).count();
        assert_eq!(references, frames);

        for (w, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().expect("mutator"), w + 1);
        }
        assert_eq!(registry.live_threads(), 0);
    }
}
