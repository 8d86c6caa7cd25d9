//! Run named AppleScript/JXA scripts through `osascript` with typed template
//! values, timeouts and classified failures, and read application scripting
//! dictionaries.

pub mod classifier;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod recorder;
pub mod runner;
pub mod scripts;
pub mod sdef;
pub mod template;

pub use error::{Error, Result};
