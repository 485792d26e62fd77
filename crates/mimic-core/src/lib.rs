//! mimic-core: the keyspace engine.
//!
//! A fixed set of numbered databases, each a [`Keyspace`] behind its own
//! lock. Every dictionary in the engine (databases, hashes, sets) is the
//! same cursor-stable [`dict::Dict`]. Blocked list commands park in a
//! per-database [`wait::WaitTable`] and are woken by the write that makes
//! data available, inside the same critical section.

pub mod blocking;
pub mod dict;
pub mod error;
pub mod expiry;
pub mod glob;
pub mod keyspace;
pub mod session;
pub mod spaces;
pub mod time;
pub mod types;
pub mod wait;

pub use blocking::{blocking_move, blocking_pop, Interrupt, InterruptReceiver, InterruptSender};
pub use error::{CommandError, WrongType};
pub use glob::GlobPattern;
pub use keyspace::{
    Keyspace, SetAlgebra, SetCondition, SetExpiry, SetOptions, SetOutcome, TtlResult,
};
pub use session::Session;
pub use spaces::{Database, KeyspaceSet, KeyspaceSetConfig};
pub use types::{End, Value, ValueKind};
