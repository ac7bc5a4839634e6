pub mod cancel;
pub mod context;
pub mod engine;
pub mod progress;

pub use cancel::CancelFlag;
pub use context::PipelineContext;
pub use engine::{EngineState, PipelineOutcome, PipelineResult, ScraperEngine, StepTimeouts};
pub use progress::{step_progress, NoopProgress, ProgressEvent, ProgressReporter};
