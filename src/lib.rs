// ABOUTME: Library crate for topyaz-coordination exposing the remote file coordination API

pub mod config;
pub mod coordination;
pub mod transport;
