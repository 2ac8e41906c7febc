//! Parser module for corral scripts

pub mod ast;
pub mod grammar;
pub mod nesting;

pub use ast::*;
pub use grammar::parse_program;
pub use nesting::{MAX_NESTING_DEPTH, MAX_TREE_DEPTH};
