// Candle Join - streaming multi-source candle builder
// Layer 1: paginated sources, Layer 2: event streams, Layer 3: candle aggregation

pub mod core;
pub mod layer1;
pub mod layer2;
pub mod layer3;
