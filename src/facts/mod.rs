mod domains;
mod transfer;

pub use domains::*;
pub use transfer::*;
