pub mod elements;
pub mod interpret;
pub mod network;
pub mod propagate;
pub mod report;
pub mod validation;
