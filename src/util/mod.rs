pub mod merge;

pub use merge::{deep_extend, merge_layers};
