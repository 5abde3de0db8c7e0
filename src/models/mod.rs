mod cache_entry;
mod dead_letter;
mod operation;
mod operation_kind;

pub use cache_entry::CacheEntry;
pub use dead_letter::DeadLetter;
pub use operation::Operation;
pub use operation_kind::OperationKind;
