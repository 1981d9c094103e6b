pub mod error;
pub mod handle;
pub mod launcher;
pub mod port;
pub mod signals;
pub mod supervisor;
pub mod sweep;
pub mod tier;
pub mod tree;
pub mod waiter;

pub use error::*;
pub use handle::*;
pub use launcher::*;
pub use port::*;
pub use signals::*;
pub use supervisor::*;
pub use sweep::*;
pub use tier::*;
pub use tree::*;
pub use waiter::*;
