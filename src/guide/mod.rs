pub mod apply;
pub mod pipeline;

pub use apply::{compose_guidance, Applied, OutcomeApplier};
pub use pipeline::GuidePipeline;
