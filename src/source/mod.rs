//! Video sources
//!
//! Everything between a source URL and canonical video items: payload
//! decoding, config and catalog parsing, CMS dispatch, result normalization
//! and the pipeline that drives them.

pub mod bitmap;
pub mod catalog;
pub mod config;
pub mod decoder;
pub mod descriptor;
pub mod direct;
pub mod normalize;
pub mod pipeline;
pub mod play;
pub mod xml;

pub use catalog::SiteCatalog;
pub use config::{ContentKind, SourceConfig, SourceConfigParser};
pub use decoder::{DecodedPayload, Encoding, PayloadDecoder};
pub use descriptor::{SourceDescriptor, SourceKind};
pub use direct::DirectQuery;
pub use normalize::{normalize, Category, HomeContent, VideoItem};
pub use pipeline::{SearchHit, SourcePipeline};
pub use play::{Episode, PlayResolution, PlaySource};
