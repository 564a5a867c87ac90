pub mod market;
pub mod portfolio;
pub mod response;

pub use market::*;
pub use portfolio::*;
pub use response::*;
