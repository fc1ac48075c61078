//! # photovault-media
//!
//! Synchronous, CPU-bound image codecs used by the ingest pipeline and the
//! startup reconciliation:
//!
//! - [`decode`]: decode any supported raster and apply its EXIF orientation
//! - [`heif`]: HEIC/HEIF to JPEG transcoding
//! - [`thumbnail`]: bounded, non-upscaling JPEG thumbnails and their names
//!
//! Callers in async contexts are expected to run these on a blocking pool.

pub mod decode;
pub mod error;
pub mod heif;
pub mod thumbnail;

pub use error::MediaError;
pub use heif::transcode_heif_to_jpeg;
pub use thumbnail::{make_thumbnail, thumbnail_name};
