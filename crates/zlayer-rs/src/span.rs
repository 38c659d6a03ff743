//! Interface to the span manager.
//!
//! The span manager owns span fetching, caching, eviction, and
//! decompression policy; this crate only consumes its byte interface. Given
//! an absolute uncompressed interval over the layer it returns a lazy byte
//! stream which the layer reader drains synchronously to EOF. An
//! implementation may back the stream with an async producer, but it must
//! present a blocking drain.

use std::io::Read;

use crate::error::Result;

/// Provider of uncompressed layer bytes by absolute interval.
pub trait SpanManager: Send + Sync {
    /// Return a stream over the uncompressed bytes `[start, end)` of the
    /// layer. The caller drains the stream fully; a stream that ends short
    /// of `end - start` bytes surfaces as a short-read at the call site.
    fn get_contents(&self, start: u64, end: u64) -> Result<Box<dyn Read + Send>>;
}
