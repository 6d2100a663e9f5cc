pub mod decoder;

pub use decoder::{decode_thinking, DecodeState, DecodedStream, StreamDecoder, CLOSE_TAG, OPEN_TAG};
