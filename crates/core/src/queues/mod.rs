//! The four in-flight instruction queues: LDQ, STQ, MCQ, BDQ.
//!
//! Each is a fixed-capacity ring buffer with its own head/tail bookkeeping,
//! deliberately not unified behind a shared generic container — the queues'
//! dequeue conditions, pointer counts, and state machines differ enough
//! (one pointer for LDQ, three for STQ, a bounds-check state machine for
//! MCQ/BDQ) that a shared abstraction would hide more than it saves.

pub mod bdq;
pub mod ldq;
pub mod mcq;
pub mod stq;

pub use bdq::{Bdq, BdqEntry, BdqState};
pub use ldq::{Ldq, LdqEntry};
pub use mcq::{Mcq, McqEntry, McqState};
pub use stq::{Stq, StqEntry};
