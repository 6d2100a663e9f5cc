/// One item of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LLMChunk {
    /// Next text delta, in arrival order.
    Token(String),
    /// The server signalled the end of the stream.
    Done,
}
