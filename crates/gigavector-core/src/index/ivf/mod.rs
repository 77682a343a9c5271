//! The inverted-file index family.
//!
//! # Module Organization
//!
//! - `kmeans`: k-means++ training shared by the coarse quantizers and PQ
//! - `flat`: IVF-Flat (exact distances inside probed lists)
//! - `pq`: IVF-PQ (product-quantized residuals, ADC scoring)

mod flat;
mod kmeans;
mod pq;


pub use flat::IvfFlatIndex;
pub use pq::{IvfPqIndex, ProductQuantizer};
