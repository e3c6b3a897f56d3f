pub mod blocks;
pub mod sexp;

// Re-export for convenience
pub use blocks::{BlockError, NamedBlock, Segment, Span};
pub use sexp::{parse_str, ParseError, SExp, SExpParser};
