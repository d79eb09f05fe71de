pub mod description;
pub mod types;

pub use description::*;
pub use types::*;
