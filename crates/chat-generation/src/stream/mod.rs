pub mod handler;

pub use handler::{consume_fragments, StreamEnd};
