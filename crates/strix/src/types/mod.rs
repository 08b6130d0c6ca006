/// Runtime containers stored in the heap arena.
///
/// The deque is the performance-sensitive core; lists, tuples, dicts and
/// strings exist so argument capture and `*args`/`**kwargs` expansion have
/// something to build and read.
pub mod deque;
pub mod dict;
pub mod iter;
pub mod list;
pub mod str;
pub mod tuple;
pub mod r#type;

pub use deque::{Deque, DequeIter, DequeLayout, DequeRevIter};
pub use dict::{Dict, DictKey};
pub use iter::ValueIter;
pub use list::List;
pub use r#type::Type;
pub use str::Str;
pub use tuple::Tuple;
