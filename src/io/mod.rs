//! Byte-range I/O against local files, HTTP servers and S3.
//!
//! ```text
//!  BlockCache ──▶ RetryingReader ──▶ LocalRangeReader | HttpRangeReader | S3RangeReader
//! ```

mod block_cache;
mod http_reader;
mod local_reader;
mod range_reader;
mod retry;
mod s3_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use http_reader::{create_http_client, HttpRangeReader, DEFAULT_HTTP_TIMEOUT};
pub use local_reader::LocalRangeReader;
pub use range_reader::{MemoryReader, RangeReader};
pub use retry::{RetryPolicy, RetryingReader};
pub use s3_reader::{create_s3_client, S3Location, S3RangeReader};
