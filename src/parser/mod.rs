//! Parsers for declared container images

pub mod image_ref;

pub use image_ref::{ImageLocation, ImageReference, parse_image, split_image_url};
