use crate::Result;
use crate::error::Error;
use crate::tpl::ast::Fragment;
use crate::tpl::render::{self, RenderBuffer};
use crate::tpl::render_context::Context;
use crate::value::{Scope, ToValue, into_scope};
use std::fmt;
use std::sync::Arc;

/// How deep `include`/`extends` may nest before rendering gives up.
pub const MAX_DEPTH: usize = 64;

/// A compiled template: a node tree plus default parameters and framework entries.
///
/// Immutable once compiled, so one instance can be cached and rendered from many
/// threads at once; every render builds its own scope and buffer.
pub struct Template {
    fragment: Fragment,
    params: Scope,
    globals: Arc<Scope>,
}

impl Template {
    pub(crate) fn new(fragment: Fragment, params: Scope, globals: Arc<Scope>) -> Self {
        Self {
            fragment,
            params,
            globals,
        }
    }

    pub fn name(&self) -> &str {
        self.fragment.name()
    }

    pub fn fragment(&self) -> &Fragment {
        &self.fragment
    }

    /// Default parameters, overridden by whatever the caller passes.
    pub fn params(&self) -> &Scope {
        &self.params
    }

    /// Renders with `params`, which must convert to a map, or to `Null` for none.
    ///
    /// ```
    /// let template = moody::compile("Hello {{ name }}").unwrap();
    /// assert_eq!(template.render(&moody::params! { "name" => "world" }).unwrap(), "Hello world");
    /// ```
    pub fn render<T: ToValue + ?Sized>(&self, params: &T) -> Result<String> {
        let mut scope = self.params.clone();
        scope.extend(into_scope(params.to_value())?);
        let mut ctx = Context::new(scope, self.globals.clone());
        let mut buf = RenderBuffer::default();
        render::render(&self.fragment, &mut ctx, &mut buf)?;
        Ok(buf.into_string())
    }

    /// Context for rendering this template from inside another render (include or
    /// extends). Defaults sit under the caller's scope, this template's framework
    /// entries sit over the caller's.
    pub(crate) fn sub_context(&self, ctx: &Context) -> Result<Context> {
        if ctx.meta.depth >= MAX_DEPTH {
            return Err(Error::Depth(MAX_DEPTH));
        }
        let mut scope = self.params.clone();
        scope.extend(ctx.scope.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut meta = ctx.meta.clone();
        if !Arc::ptr_eq(&meta.globals, &self.globals) {
            let mut globals = (*meta.globals).clone();
            globals.extend(self.globals.iter().map(|(k, v)| (k.clone(), v.clone())));
            meta.globals = Arc::new(globals);
        }
        meta.depth += 1;
        Ok(Context { scope, meta })
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name())
            .field("nodes", &self.fragment.nodes().len())
            .finish()
    }
}
