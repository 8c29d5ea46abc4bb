//! Message handling - turning host input into runtime traffic

pub mod parser;

pub use parser::{MessageParser, ParsedInput};
