mod broadcaster;
mod client;
mod traits;

pub use broadcaster::*;
pub use client::*;
pub use traits::*;
