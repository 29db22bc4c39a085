// crates/core/src/lib.rs
pub mod error;
pub mod job;
pub mod work;

pub use error::*;
pub use job::*;
pub use work::*;
