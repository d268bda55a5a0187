#![doc = include_str!("../Readme.md")]

pub mod commands;
pub mod encoding;

mod envelope;
mod line;

pub use envelope::{Envelope, MAX_ATTR_LEN};
pub use line::Line;
