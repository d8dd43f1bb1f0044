pub mod admittance;
pub mod network;

pub use admittance::*;
pub use network::*;
