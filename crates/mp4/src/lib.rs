//! Minimal ISOBMFF helpers for probing progressive MP4 downloads.

mod box_utils;
pub mod movie;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use movie::{MovieInfo, MovieProbe, mime_for_brand, probe_movie};
