//! A small, extensible templating language.
//!
//! Templates mix literal text with `{{ expression }}` placeholders, `{% tag %}`
//! control tags and `{# comments #}`. They compile once into an immutable node
//! tree and render against a scope of named values:
//!
//! ```
//! let template = moody::compile("{% for n in range(3) %}{{ n }}{% endfor %}").unwrap();
//! assert_eq!(template.render(&()).unwrap(), "012");
//! ```
//!
//! Templates that `include` or `extends` others by name are loaded through a
//! [`Loader`], which also caches what it compiles.

pub mod error;
pub mod loader;
pub mod tpl;
pub mod value;

pub use error::Error;
pub use loader::{DirectorySource, Loader, LoaderBuilder, LoaderRef, MemorySource, Source};
pub use tpl::engine::{compile, render};
pub use tpl::escape::escape_html;
pub use tpl::macros::{Macro, default_macros};
pub use tpl::parser::{DEFAULT_PARSER, Parser, ParserRun};
pub use tpl::render_context::{AUTOESCAPE_KEY, LOADER_KEY, NAME_KEY, SUPER_KEY};
pub use tpl::template::Template;
pub use value::{Function, Scope, ToValue, Value};

pub type Result<T> = std::result::Result<T, Error>;
