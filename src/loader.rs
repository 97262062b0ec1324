use crate::Result;
use crate::error::Error;
use crate::tpl::parser::{DEFAULT_NAME, Parser};
use crate::tpl::render_context::{LOADER_KEY, SUPER_KEY};
use crate::tpl::template::Template;
use crate::value::{Scope, ToValue, Value};
use dashmap::DashMap;
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};

/// A place template source text can be read from.
///
/// `Display` names the source in "template not found" errors.
pub trait Source: Send + Sync + fmt::Display {
    /// The source of `name`, or `None` when this source does not have it.
    fn load_source(&self, name: &str) -> Result<Option<String>>;
}

/// Templates held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    templates: HashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template(mut self, name: &str, source: &str) -> Self {
        self.templates.insert(name.to_string(), source.to_string());
        self
    }
}

impl<N: Into<String>, S: Into<String>> FromIterator<(N, S)> for MemorySource {
    fn from_iter<I: IntoIterator<Item = (N, S)>>(iter: I) -> Self {
        Self {
            templates: iter
                .into_iter()
                .map(|(n, s)| (n.into(), s.into()))
                .collect(),
        }
    }
}

impl Source for MemorySource {
    fn load_source(&self, name: &str) -> Result<Option<String>> {
        Ok(self.templates.get(name).cloned())
    }
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<memory>")
    }
}

/// Templates read from files under a root directory. Names use `/` as separator.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            warn!(
                "refusing template name {:?} outside of {}",
                name,
                self.root.display()
            );
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl Source for DirectorySource {
    fn load_source(&self, name: &str) -> Result<Option<String>> {
        let Some(path) = self.resolve(name) else {
            return Ok(None);
        };
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }
}

impl fmt::Display for DirectorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.display())
    }
}

struct LoaderInner {
    sources: Vec<Box<dyn Source>>,
    parser: Parser,
    cache: Option<DashMap<String, Arc<Template>>>,
    this: Weak<LoaderInner>,
}

/// Resolves template names through an ordered list of sources, compiling and
/// (optionally) caching the results.
///
/// Cloning is cheap and shares the cache.
///
/// ```
/// use moody::{Loader, MemorySource};
///
/// let loader = Loader::builder()
///     .source(MemorySource::new().template("hello.txt", "Hello {{ name }}"))
///     .build();
/// let out = loader.render("hello.txt", &moody::params! { "name" => "world" }).unwrap();
/// assert_eq!(out, "Hello world");
/// ```
#[derive(Clone)]
pub struct Loader {
    inner: Arc<LoaderInner>,
}

/// A non-owning handle to a [`Loader`], stored under `__loader__` in every template
/// it compiles.
#[derive(Clone)]
pub struct LoaderRef {
    inner: Weak<LoaderInner>,
}

impl LoaderRef {
    pub fn upgrade(&self) -> Option<Loader> {
        self.inner.upgrade().map(|inner| Loader { inner })
    }

    pub fn ptr_eq(&self, other: &LoaderRef) -> bool {
        Weak::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn load(&self, name: &str) -> Result<Arc<Template>> {
        match self.upgrade() {
            Some(loader) => loader.load(name),
            None => Err(Error::eval(format!(
                "Cannot load {:?}, the loader that compiled this template has been dropped.",
                name
            ))),
        }
    }
}

impl fmt::Debug for LoaderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoaderRef")
    }
}

pub struct LoaderBuilder {
    sources: Vec<Box<dyn Source>>,
    parser: Option<Parser>,
    cache: bool,
}

impl LoaderBuilder {
    /// Adds a source. Sources registered earlier take priority.
    pub fn source(mut self, source: impl Source + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn parser(mut self, parser: Parser) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Disable to recompile on every load, e.g. while editing templates.
    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn build(self) -> Loader {
        let LoaderBuilder {
            sources,
            parser,
            cache,
        } = self;
        let inner = Arc::new_cyclic(|this| LoaderInner {
            sources,
            parser: parser.unwrap_or_default(),
            cache: cache.then(DashMap::new),
            this: this.clone(),
        });
        Loader { inner }
    }
}

impl Loader {
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder {
            sources: Vec::new(),
            parser: None,
            cache: true,
        }
    }

    pub fn handle(&self) -> LoaderRef {
        LoaderRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Compiles a template that can `include`/`extends` templates from this loader.
    pub fn compile(&self, source: &str) -> Result<Template> {
        self.compile_with(source, DEFAULT_NAME, Scope::new(), Scope::new())
    }

    pub fn compile_with(
        &self,
        source: &str,
        name: &str,
        params: Scope,
        meta: Scope,
    ) -> Result<Template> {
        self.inner.compile_with(source, name, params, meta)
    }

    /// Loads a template by name. Fails with [`Error::TemplateNotFound`] when no
    /// source has it.
    pub fn load(&self, name: &str) -> Result<Arc<Template>> {
        self.load_any(&[name])
    }

    /// Loads the first of `names` that some source has.
    pub fn load_any(&self, names: &[&str]) -> Result<Arc<Template>> {
        if names.is_empty() {
            return Err(Error::Value(
                "You must specify at least one template name.".to_string(),
            ));
        }
        for name in names {
            if let Some(template) = self.inner.load_all(name)? {
                return Ok(template);
            }
        }
        Err(Error::TemplateNotFound {
            names: names.iter().map(|n| n.to_string()).collect(),
            sources: self.inner.sources.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn render<T: ToValue + ?Sized>(&self, name: &str, params: &T) -> Result<String> {
        self.load(name)?.render(params)
    }

    pub fn render_any<T: ToValue + ?Sized>(&self, names: &[&str], params: &T) -> Result<String> {
        self.load_any(names)?.render(params)
    }

    /// Number of cached templates; always `0` when caching is disabled.
    pub fn cache_len(&self) -> usize {
        self.inner.cache.as_ref().map_or(0, DashMap::len)
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.inner.cache {
            debug!("clearing {} cached templates", cache.len());
            cache.clear();
        }
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<String> = self.inner.sources.iter().map(|s| s.to_string()).collect();
        f.debug_struct("Loader")
            .field("sources", &sources)
            .field("cached", &self.cache_len())
            .finish()
    }
}

impl LoaderInner {
    fn compile_with(&self, source: &str, name: &str, params: Scope, meta: Scope) -> Result<Template> {
        let mut globals = Scope::new();
        globals.insert(
            LOADER_KEY.to_string(),
            Value::Loader(LoaderRef {
                inner: self.this.clone(),
            }),
        );
        globals.extend(meta);
        self.parser.compile_with(source, name, params, globals)
    }

    /// Compiles `name` from every source that has it, lowest priority first, each
    /// one reachable from the next through `__super__`. Returns the highest
    /// priority one.
    fn load_all(&self, name: &str) -> Result<Option<Arc<Template>>> {
        if let Some(cache) = &self.cache
            && let Some(template) = cache.get(name)
        {
            debug!("template {:?} served from cache", name);
            return Ok(Some(template.value().clone()));
        }

        let mut found: Option<Arc<Template>> = None;
        for source in self.sources.iter().rev() {
            let Some(text) = source.load_source(name)? else {
                trace!("template {:?} not in {}", name, source);
                continue;
            };
            let mut meta = Scope::new();
            meta.insert(
                SUPER_KEY.to_string(),
                found.take().map_or(Value::Null, Value::Template),
            );
            found = Some(Arc::new(self.compile_with(&text, name, Scope::new(), meta)?));
        }

        match (&self.cache, found) {
            (Some(cache), Some(template)) => {
                debug!("template {:?} compiled and cached", name);
                let cached = cache.entry(name.to_string()).or_insert(template);
                Ok(Some(cached.value().clone()))
            }
            (_, found) => Ok(found),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> Loader {
        Loader::builder()
            .source(MemorySource::new().template("a.txt", "A{{ x }}"))
            .source(
                MemorySource::new()
                    .template("a.txt", "fallback")
                    .template("b.txt", "B"),
            )
            .build()
    }

    #[test]
    fn test_first_source_wins() {
        let loader = loader();
        assert_eq!(loader.render("a.txt", &crate::params! { "x" => 1 }).unwrap(), "A1");
        assert_eq!(loader.render("b.txt", &()).unwrap(), "B");
    }

    #[test]
    fn test_load_any_falls_back() {
        let loader = loader();
        let template = loader.load_any(&["missing.txt", "b.txt"]).unwrap();
        assert_eq!(template.name(), "b.txt");
        assert!(loader.load_any(&[]).is_err());
    }

    #[test]
    fn test_not_found_names_everything_tried() {
        let err = loader().load_any(&["x.txt", "y.txt"]).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Could not find a template named \"x.txt\", \"y.txt\" in any of <memory>, <memory>."
        );
    }

    #[test]
    fn test_cache() {
        let loader = loader();
        assert_eq!(loader.cache_len(), 0);
        let first = loader.load("b.txt").unwrap();
        let second = loader.load("b.txt").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.cache_len(), 1);
        let _ = loader.load("nope.txt");
        assert_eq!(loader.cache_len(), 1);
        loader.clear();
        assert_eq!(loader.cache_len(), 0);
    }

    #[test]
    fn test_uncached() {
        let loader = Loader::builder()
            .source(MemorySource::new().template("a.txt", "a"))
            .cache(false)
            .build();
        let first = loader.load("a.txt").unwrap();
        let second = loader.load("a.txt").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(loader.cache_len(), 0);
    }

    #[test]
    fn test_loader_handle_is_weak() {
        let loader = loader();
        let handle = loader.handle();
        assert!(handle.ptr_eq(&loader.clone().handle()));
        let template = loader.load("a.txt").unwrap();
        drop(loader);
        assert!(handle.upgrade().is_none());
        assert!(handle.load("b.txt").is_err());
        assert_eq!(template.name(), "a.txt");
    }

    #[test]
    fn test_directory_source_refuses_escapes() {
        let source = DirectorySource::new(std::env::temp_dir());
        assert!(source.load_source("../etc/passwd").unwrap().is_none());
        assert!(source.load_source("/etc/passwd").unwrap().is_none());
        assert!(
            source
                .load_source("moody-surely-missing-template.txt")
                .unwrap()
                .is_none()
        );
    }
}
