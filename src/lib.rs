pub mod ast;
pub mod backend;
pub mod codegen;
pub mod driver;
pub mod engine;
pub mod ir;
pub mod lexer;
#[cfg(feature = "llvm")]
pub mod llvm;
pub mod optimizer;
pub mod parser;
pub mod printer;

pub use backend::{Backend, IrBackend};
pub use driver::{Driver, DriverOptions};

/// Name given to the module every session compiles into.
pub const MODULE_NAME: &str = "kaleidoscope";
