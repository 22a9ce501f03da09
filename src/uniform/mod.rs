//! Uniform arenas and the blocks that sub-allocate from them.

pub mod arena;
pub mod block;
pub mod value;

pub use arena::{ArenaCapacities, ArenaKind, UniformArena, UniformArenas};
pub use block::{UniformBlock, ValueSupplier};
pub use value::{align_up, UniformValue};
