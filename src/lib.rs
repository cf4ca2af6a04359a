//! WARP (Weighted Approximate-Rank Pairwise) sampling and bounded SGD updates
//! for latent-factor models over a CSR rating matrix.
//!
//! The kernel in [`warp_sample`] draws `(user, positive item, violating
//! negative item)` triples, and [`apply_updates`] applies projected updates to
//! factor rows. [`WarpModel`] is a small training loop built on both.
mod error;
mod ratings;
mod warp;
mod warp_fast;

pub use error::*;
pub use ratings::*;
pub use warp::*;
pub use warp_fast::*;

pub type Flt = f32;
