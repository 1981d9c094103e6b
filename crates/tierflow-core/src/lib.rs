pub mod error;
pub mod loader;
pub mod model;

pub use error::*;
pub use loader::*;
pub use model::*;
