// Layer 3 - Candle Aggregation
// Folds merged event streams into fixed-width candles and exports them

pub mod accumulator;
pub mod aggregator;
pub mod export;
pub mod pipeline;

// Re-export commonly used items
pub use accumulator::CandleFiller;
pub use aggregator::{BucketAggregator, AggregatorStats, SourceLane};
pub use export::{CandleRecord, CandleSink, JsonlCandleWriter};
pub use pipeline::{CandlePipeline, PipelineStats};
