// Layer 2 - Event Streams
// Turns paginated sources into ordered, peekable, optionally concurrent event streams

pub mod cursor;
pub mod loader;
pub mod channel;

// Re-export commonly used items
pub use cursor::{PullStream, EventStream, IterStream, LookaheadCursor};
pub use loader::{IncrementalLoader, LoaderStats, LoadEnd, DEFAULT_BACKOFF};
pub use channel::{spawn_producer, ChannelStream};
