//! Output writers

pub mod json;
