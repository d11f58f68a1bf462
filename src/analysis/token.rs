//! Token representation.

/// One analyzed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Term text as it will be indexed.
    pub text: String,

    /// Byte offset of the first character in the source text.
    pub start_offset: usize,

    /// Byte offset one past the last character in the source text.
    pub end_offset: usize,

    /// Distance in positions from the previous token. 1 for adjacent tokens,
    /// 0 to stack a token on the previous position.
    pub position_increment: u32,
}

impl Token {
    pub fn new<S: Into<String>>(text: S, start_offset: usize, end_offset: usize) -> Self {
        Token {
            text: text.into(),
            start_offset,
            end_offset,
            position_increment: 1,
        }
    }

    pub fn with_position_increment(mut self, increment: u32) -> Self {
        self.position_increment = increment;
        self
    }
}

/// Boxed stream of tokens produced by an analyzer.
pub type TokenStream = Box<dyn Iterator<Item = Token> + Send>;
