//! Entry metadata: environment resource detection and per-record extraction.

pub mod extractor;
pub mod resource;
pub mod source;

pub use extractor::{Extracted, MetadataExtractor};
pub use resource::ResourceDetector;
pub use source::{Attribute, GceMetadataClient, MetadataError, MetadataSource, StaticMetadata};
