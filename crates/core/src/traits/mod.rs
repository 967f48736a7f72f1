pub mod lifecycle;
pub mod transport;

pub use lifecycle::*;
pub use transport::*;
