pub mod error;
pub mod detect;
pub mod reader;
pub mod index;
pub mod heap;
pub mod gaps;
pub mod stats;
pub mod masking;
pub mod similar;
pub mod config;
pub mod cache;
pub mod handler;
pub mod multiline;
pub mod jsonl;
pub mod timeline;

pub use error::{Error, Result};
