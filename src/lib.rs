use std::error::Error;

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod menu;
pub mod model;
pub mod store;

/// Joins an error and its chain of sources into one line.
pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
