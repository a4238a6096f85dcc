mod buffer;
mod config;
mod dispenser;
mod error;
mod segment;
mod store;
#[cfg(test)]
mod testing;

pub use crate::buffer::*;
pub use crate::config::*;
pub use crate::dispenser::*;
pub use crate::error::*;
pub use crate::segment::*;
pub use crate::store::*;
