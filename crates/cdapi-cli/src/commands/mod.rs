//! Command implementations for cdapi

pub mod execute;
pub mod fetch;

pub use execute::execute;
pub use fetch::fetch;
