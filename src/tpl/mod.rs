pub mod ast;
pub mod binding;
pub(crate) mod engine;
pub mod escape;
pub mod expr;
pub mod lexer;
pub mod macros;
pub mod parser;
pub(crate) mod render;
pub(crate) mod render_context;
pub mod template;
