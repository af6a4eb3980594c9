//! Request flows: the semantic pipeline and the debate fan-out.

pub mod debate;
pub mod semantic;

pub use debate::{DebateFlow, DebateOutcome, WorkerStatus};
pub use semantic::{SemanticFlow, SemanticOutcome};
