//! Document processing pipeline and batch orchestration.

mod batch;
mod processor;
mod render;

pub use batch::{BatchCounters, BatchStats};
pub use processor::{InvoiceProcessor, PipelineError};
pub use render::{PageRenderer, PdftoppmRenderer, RenderError};
