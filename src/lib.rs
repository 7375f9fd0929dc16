#![warn(rust_2018_idioms)]

pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod policy;
pub mod relay;
pub mod server;
pub mod session;

pub use error::{Error, ErrorKind, Result};

pub(crate) const UNSPECIFIED_STR: &str = "Unspecified";
