//! Translation between structured catalog filter trees and CQL text.

mod error;
mod filter;
mod lexer;
mod parser;
mod write;

pub use error::{Error, Result};
pub use filter::{CompareOp, Filter, Literal};
pub use parser::parse;
pub use write::{quote_property, to_cql};
