//! Resource management
//!
//! Materials, texture loading and the renderer-owned texture cache.

mod cache;
mod material;
mod texture;

pub use cache::*;
pub use material::*;
pub use texture::*;
