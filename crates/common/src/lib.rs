//! This crate provides the polling primitives and fixture types that the other crates in the
//! workspace share.

pub mod futures;
pub mod types;
