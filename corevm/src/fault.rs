use thiserror::Error;

/// Unrecoverable conditions of the execution core.
///
/// Stack overflow and arena allocation failure mean a resource ran out. The
/// runtime cannot continue the affected thread, but the owner may shut down
/// gracefully instead of taking the whole process with it. Callers that have
/// nothing better to do call [`Fault::abort`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error(
        "stack overflow: frame needs {requested} bytes, {available} bytes left"
    )]
    StackOverflow { requested: usize, available: usize },

    #[error("could not allocate a stack of {size} bytes")]
    ArenaAllocation { size: usize },

    #[error("could not start native thread: {0}")]
    NativeThread(String),
}

impl Fault {
    #[must_use]
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Fault::StackOverflow { .. } | Fault::ArenaAllocation { .. })
    }

    /// Fail fast.
    pub fn abort(self) -> ! {
        log::error!("fatal: {self}");
        std::process::abort()
    }
}

pub trait OrAbort<T> {
    /// Unwraps the result or aborts the process on a fault.
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for Result<T, Fault> {
    #[inline]
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(fault) => fault.abort(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faults_are_resource_exhaustion() {
        let overflow = Fault::StackOverflow {
            requested: 96,
            available: 16,
        };
        let allocation = Fault::ArenaAllocation { size: 1 << 40 };
        assert!(overflow.is_resource_exhausted());
        assert!(allocation.is_resource_exhausted());
    }

    #[test]
    fn failed_spawns_are_not_exhaustion() {
        let spawn = Fault::NativeThread("no threads left".to_string());
        assert!(!spawn.is_resource_exhausted());
        assert_eq!(spawn.to_string(), "could not start native thread: no threads left");
    }

    #[test]
    fn messages_name_the_sizes() {
        let overflow = Fault::StackOverflow {
            requested: 96,
            available: 16,
        };
        assert_eq!(
            overflow.to_string(),
            "stack overflow: frame needs 96 bytes, 16 bytes left"
        );
    }

    #[test]
    fn or_abort_passes_values_through() {
        let ok: Result<u8, Fault> = Ok(3);
        assert_eq!(ok.or_abort(), 3);
    }
}
