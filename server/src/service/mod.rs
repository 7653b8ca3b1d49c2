//! Service layer

pub mod container;
pub mod filesystem;
pub mod hub;
pub mod project;
pub mod terminal;

#[cfg(test)]
pub(crate) mod testing;
