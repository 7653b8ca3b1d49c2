//! Domain model

pub mod container;
pub mod file_node;
pub mod path;
pub mod project;
pub mod types;
