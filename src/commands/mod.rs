pub mod charts;
pub mod serve;
pub mod setup;
pub mod validate;
