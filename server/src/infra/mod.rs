//! Infrastructure layer

pub mod archive;
pub mod docker;
pub mod file_repository;
pub mod ports;
pub mod project_repository;
pub mod runtime;
pub mod sqlite;

#[cfg(test)]
pub mod fake_runtime;
