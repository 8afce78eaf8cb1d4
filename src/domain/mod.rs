pub mod decision;
pub mod types;

pub use decision::*;
pub use types::*;
