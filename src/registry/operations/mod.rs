//! Distribution API operations, grouped by resource

pub mod blob;
pub mod catalog;
pub mod manifest;
