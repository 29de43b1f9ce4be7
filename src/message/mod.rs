mod parse;
pub mod tags;
mod types;

pub use self::types::{Message, Tag};
