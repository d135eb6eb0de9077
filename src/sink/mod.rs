pub mod metadata;
pub mod record;
pub mod stream;

pub use metadata::{MetadataError, MetadataSink};
pub use record::MetadataRecord;
pub use stream::{RtspStreamSink, StreamError};
