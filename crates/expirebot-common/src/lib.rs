pub mod duration;
pub mod error;
