mod pipeline;
mod sink;

pub use pipeline::IngestPipeline;
pub use sink::{LogSink, SampleSink};
