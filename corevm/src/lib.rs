mod dictionary;
mod fault;
mod frame;
mod function;
mod roots;
mod stack;
mod tagged;
mod threads;
mod visitor;

pub use dictionary::{
    DEFAULT_INITIAL_CAPACITY, DEFAULT_LOAD_FACTOR, Dictionary, DictionaryHash,
    DictionarySettings, Iter as DictionaryIter, MAXIMUM_CAPACITY,
};
pub use fault::{Fault, OrAbort};
pub use frame::*;
pub use function::*;
pub use roots::{ScanStats, scan, scan_all};
pub use stack::*;
pub use tagged::*;
pub use threads::*;
pub use visitor::{MarkFn, NO_RECORD, Visitable, Visitor};
