mod association;
mod compiler;
mod root_signature;

pub use association::*;
pub use compiler::*;
pub use root_signature::*;
