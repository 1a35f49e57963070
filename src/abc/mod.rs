//! ABC notation: scanner, parser, tree model and formatter.

pub mod formatter;
pub mod parser;
pub mod pitch;
pub mod scanner;
pub mod tree;

pub use formatter::{format, FormatOptions};
pub use parser::parse;
pub use tree::{AbcTree, Arena, Node, NodeId};
