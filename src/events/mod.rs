pub mod expand;
pub mod resolve;
pub mod tree;

pub use expand::*;
pub use resolve::*;
pub use tree::{EventTree, Leaf};
