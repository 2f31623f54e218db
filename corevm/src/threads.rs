use std::{
    cell::UnsafeCell,
    fmt,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;

use crate::{Fault, Stack, StackCreateInfo};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL_REGISTRY: LazyLock<Arc<ThreadRegistry>> =
    LazyLock::new(|| Arc::new(ThreadRegistry::new()));

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    fn next() -> Self {
        Self(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThreadCreateInfo {
    pub name: Option<String>,
    pub stack: StackCreateInfo,
}

pub struct ThreadShared {
    id: ThreadId,
    name: Option<String>,
    /// registry slot, fixed for the lifetime of the registration
    slot: usize,
    stack: UnsafeCell<Stack>,
}

// SAFETY: the stack is only mutated by the owning `Thread`, other threads
// only reach it through the unsafe accessors of `ThreadRef`
unsafe impl Send for ThreadShared {}
// SAFETY: see above
unsafe impl Sync for ThreadShared {}

impl fmt::Debug for ThreadShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadShared")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

/// A registered thread as seen from other threads, e.g. the collector.
#[derive(Debug, Clone)]
pub struct ThreadRef(Arc<ThreadShared>);

impl ThreadRef {
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.0.id
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// # Safety
    /// The owning thread must not run, i.e. the world is stopped.
    #[must_use]
    pub unsafe fn stack(&self) -> &Stack {
        // SAFETY: caller guarantees the owner is not mutating
        unsafe { &*self.0.stack.get() }
    }

    /// # Safety
    /// The owning thread must not run and no other reference to the stack
    /// may be alive.
    #[allow(clippy::mut_from_ref)]
    #[must_use]
    pub unsafe fn stack_mut(&self) -> &mut Stack {
        // SAFETY: caller guarantees exclusive access
        unsafe { &mut *self.0.stack.get() }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &ThreadRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// An execution thread owning one stack.
///
/// Created when a native or language-level thread starts. Dropping it
/// unlinks it from its registry, also when the thread unwinds.
#[derive(Debug)]
pub struct Thread {
    shared: Arc<ThreadShared>,
    registry: Arc<ThreadRegistry>,
}

impl Thread {
    pub fn create(
        registry: &Arc<ThreadRegistry>,
        info: &ThreadCreateInfo,
    ) -> Result<Self, Fault> {
        let stack = Stack::new(&info.stack)?;
        let shared = registry.register(info.name.clone(), stack);
        Ok(Self {
            shared,
            registry: registry.clone(),
        })
    }

    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.shared.id
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    #[must_use]
    pub fn stack(&self) -> &Stack {
        // SAFETY: we are the owner, the collector only reads while we are
        // stopped
        unsafe { &*self.shared.stack.get() }
    }

    pub fn stack_mut(&mut self) -> &mut Stack {
        // SAFETY: we are the owner and `&mut self` makes this unique
        unsafe { &mut *self.shared.stack.get() }
    }

    #[must_use]
    pub fn handle(&self) -> ThreadRef {
        ThreadRef(self.shared.clone())
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.registry.unregister(&self.shared);
    }
}

#[derive(Debug)]
struct Entry {
    thread: ThreadRef,
    before: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct RegistryInner {
    entries: Vec<Option<Entry>>,
    free: Vec<usize>,
    /// most recently registered thread
    head: Option<usize>,
    live: usize,
}

/// Doubly linked list of live threads.
///
/// The lock is only taken to link or unlink a thread and to take a snapshot
/// for a collection, never while a stack is executing or being scanned.
#[derive(Debug)]
pub struct ThreadRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                entries: Vec::new(),
                free: Vec::new(),
                head: None,
                live: 0,
            }),
        }
    }

    /// The process-wide registry.
    #[must_use]
    pub fn global() -> &'static Arc<ThreadRegistry> {
        &GLOBAL_REGISTRY
    }

    fn register(&self, name: Option<String>, stack: Stack) -> Arc<ThreadShared> {
        let id = ThreadId::next();
        let mut inner = self.inner.lock();

        let slot = match inner.free.pop() {
            Some(slot) => slot,
            None => {
                inner.entries.push(None);
                inner.entries.len() - 1
            }
        };

        let shared = Arc::new(ThreadShared {
            id,
            name,
            slot,
            stack: UnsafeCell::new(stack),
        });

        let before = inner.head;
        if let Some(before) = before {
            inner.entry_mut(before).next = Some(slot);
        }
        inner.entries[slot] = Some(Entry {
            thread: ThreadRef(shared.clone()),
            before,
            next: None,
        });
        inner.head = Some(slot);
        inner.live += 1;

        log::debug!("registered thread {id}, {} live", inner.live);
        shared
    }

    fn unregister(&self, shared: &Arc<ThreadShared>) {
        let mut inner = self.inner.lock();
        let slot = shared.slot;
        let entry = inner.entries[slot]
            .take()
            .expect("thread is registered");

        if let Some(before) = entry.before {
            inner.entry_mut(before).next = entry.next;
        }
        match entry.next {
            Some(next) => inner.entry_mut(next).before = entry.before,
            None => inner.head = entry.before,
        }

        inner.free.push(slot);
        inner.live -= 1;
        log::debug!("unregistered thread {}, {} live", shared.id, inner.live);
    }

    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.inner.lock().live
    }

    /// The most recently registered thread.
    #[must_use]
    pub fn head(&self) -> Option<ThreadRef> {
        let inner = self.inner.lock();
        inner.head.map(|slot| inner.entry(slot).thread.clone())
    }

    /// The thread registered right before `thread`, if both are still live.
    #[must_use]
    pub fn before(&self, thread: &ThreadRef) -> Option<ThreadRef> {
        let inner = self.inner.lock();
        let entry = inner.lookup(thread)?;
        entry.before.map(|slot| inner.entry(slot).thread.clone())
    }

    /// The thread registered right after `thread`, if both are still live.
    #[must_use]
    pub fn next(&self, thread: &ThreadRef) -> Option<ThreadRef> {
        let inner = self.inner.lock();
        let entry = inner.lookup(thread)?;
        entry.next.map(|slot| inner.entry(slot).thread.clone())
    }

    /// Snapshot of all live threads, newest first.
    #[must_use]
    pub fn threads(&self) -> Vec<ThreadRef> {
        let inner = self.inner.lock();
        let mut threads = Vec::with_capacity(inner.live);
        let mut cursor = inner.head;
        while let Some(slot) = cursor {
            let entry = inner.entry(slot);
            threads.push(entry.thread.clone());
            cursor = entry.before;
        }
        debug_assert_eq!(threads.len(), inner.live, "registry list is corrupt");
        threads
    }
}

impl RegistryInner {
    fn entry(&self, slot: usize) -> &Entry {
        self.entries[slot].as_ref().expect("linked slot is occupied")
    }

    fn entry_mut(&mut self, slot: usize) -> &mut Entry {
        self.entries[slot].as_mut().expect("linked slot is occupied")
    }

    fn lookup(&self, thread: &ThreadRef) -> Option<&Entry> {
        self.entries
            .get(thread.0.slot)?
            .as_ref()
            .filter(|entry| entry.thread.ptr_eq(thread))
    }
}

/// Starts a native thread that owns a freshly registered [`Thread`] until
/// `f` returns.
///
/// The stack is allocated on the calling thread, so allocation failures are
/// reported here rather than inside the new thread.
pub fn spawn<F, T>(
    registry: &Arc<ThreadRegistry>,
    info: ThreadCreateInfo,
    f: F,
) -> Result<JoinHandle<T>, Fault>
where
    F: FnOnce(&mut Thread) -> T + Send + 'static,
    T: Send + 'static,
{
    let mut builder = thread::Builder::new();
    if let Some(name) = &info.name {
        builder = builder.name(name.clone());
    }
    let mut owned = Thread::create(registry, &info)?;
    builder
        .spawn(move || f(&mut owned))
        .map_err(|err| Fault::NativeThread(err.to_string()))
}
