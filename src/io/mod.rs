pub mod conv;
pub mod exchange;
