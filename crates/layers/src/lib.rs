pub mod aggregate;
pub mod markers;
pub mod symbology;

pub use aggregate::*;
pub use markers::*;
