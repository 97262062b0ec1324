use crate::loader::LoaderRef;
use crate::tpl::ast::{BlockMap, Fragment};
use crate::tpl::expr::Lookup;
use crate::value::{Function, Scope, Value};
use std::sync::Arc;

/// Name of the template being rendered.
pub const NAME_KEY: &str = "__name__";
/// Escaping function applied to `{{ }}` output, or `None`.
pub const AUTOESCAPE_KEY: &str = "__autoescape__";
/// Loader that compiled the template; used to resolve names in `include`/`extends`.
pub const LOADER_KEY: &str = "__loader__";
/// Same-named template from a lower-priority loader source, or `None`.
pub const SUPER_KEY: &str = "__super__";

/// Inheritance bookkeeping and template wiring carried alongside the scope.
#[derive(Clone, Default)]
pub(crate) struct Meta {
    /// Framework entries (`__name__`, `__autoescape__`, ...) consulted after the scope.
    pub globals: Arc<Scope>,
    /// Block overrides declared by the template this context renders, once it extends.
    pub blocks: Option<Arc<BlockMap>>,
    /// The context of the template that extended the one being rendered.
    pub child: Option<Arc<Context>>,
    /// Less-derived block bodies available to `super`, most-derived last.
    pub parent_blocks: Vec<(Arc<Context>, Fragment)>,
    /// Current include/extends nesting.
    pub depth: usize,
}

/// The variable state of one render. The output buffer is kept apart and passed
/// alongside by `&mut`, so sub-contexts never copy it.
#[derive(Clone, Default)]
pub struct Context {
    pub(crate) scope: Scope,
    pub(crate) meta: Meta,
}

impl Context {
    pub(crate) fn new(scope: Scope, globals: Arc<Scope>) -> Self {
        Self {
            scope,
            meta: Meta {
                globals,
                ..Meta::default()
            },
        }
    }

    /// A copy of this context for a nested body. Bindings made in the copy do not
    /// leak back.
    pub(crate) fn sub_context(&self) -> Context {
        self.clone()
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scope
            .get(name)
            .or_else(|| self.meta.globals.get(name))
    }

    pub(crate) fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    pub(crate) fn autoescape(&self) -> Option<&Function> {
        match self.lookup(AUTOESCAPE_KEY) {
            Some(Value::Func(f)) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn loader(&self) -> Option<&LoaderRef> {
        match self.lookup(LOADER_KEY) {
            Some(Value::Loader(l)) => Some(l),
            _ => None,
        }
    }
}

impl Lookup for Context {
    fn lookup(&self, name: &str) -> Option<&Value> {
        Context::lookup(self, name)
    }
}
