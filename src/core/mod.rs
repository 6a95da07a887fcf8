pub mod analysis_pass;
pub mod classifier;
pub mod comment;
pub mod consolidation;
pub mod debate;
pub mod diff_index;
pub mod finding;
pub mod pr_data;
pub mod retrieval;
pub mod structured;
pub mod workflow;

pub use analysis_pass::{AnalysisPass, PassReport};
pub use classifier::FindingClassifier;
pub use comment::{Comment, Priority, ValidationStatus};
pub use consolidation::ConsolidationEngine;
pub use debate::DebateLoop;
pub use diff_index::{DiffChunk, DiffIndexHandle};
pub use finding::{Finding, FindingCategory, PassKind};
pub use pr_data::{ChangeType, FileDiff, PRData};
pub use retrieval::{CodeSearch, RetrievalGateway};
pub use structured::parse_structured_output;
pub use workflow::{AnalysisOutcome, RunStatus, WorkflowOrchestrator};
