mod avar;
mod diagnostics;

pub use avar::*;
pub use diagnostics::*;
