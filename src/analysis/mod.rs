mod analysis;
mod semantics;
#[cfg(test)]
mod tests;

pub use analysis::*;
pub use semantics::*;
