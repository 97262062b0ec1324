use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A template could not be compiled. Raised by `compile`/`load`, never by `render`.
    #[error("{message} [{template:?} on line {line}]")]
    Compile {
        message: String,
        template: String,
        line: usize,
    },
    /// A node failed while rendering.
    #[error("{message} [{template:?} on line {line}]")]
    Render {
        message: String,
        template: String,
        line: usize,
    },
    #[error("Could not find a template named {} in any of {}.", quoted(.names), .sources.join(", "))]
    TemplateNotFound {
        names: Vec<String>,
        sources: Vec<String>,
    },
    #[error("{0}")]
    Syntax(String),
    #[error("{0}")]
    Eval(String),
    #[error("{0}")]
    Unpack(String),
    #[error("Value Error: {0}")]
    Value(String),
    /// `include`/`extends` nested deeper than the limit, usually a cycle.
    #[error("maximum template nesting depth exceeded ({0} levels)")]
    Depth(usize),
    #[error("Invalid Macro Pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn syntax(message: impl Into<String>) -> Self {
        Error::Syntax(message.into())
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Error::Eval(message.into())
    }

    pub fn is_compile(&self) -> bool {
        matches!(self, Error::Compile { .. })
    }

    pub fn is_render(&self) -> bool {
        matches!(self, Error::Render { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::TemplateNotFound { .. })
    }

    /// The template name and line this error is attributed to, if any.
    pub fn location(&self) -> Option<(&str, usize)> {
        match self {
            Error::Compile { template, line, .. } | Error::Render { template, line, .. } => {
                Some((template.as_str(), *line))
            }
            _ => None,
        }
    }

    /// Attributes a parse-time failure to a template line. Already attributed errors
    /// pass through unchanged.
    pub(crate) fn at_compile(self, template: &str, line: usize) -> Self {
        match self {
            Error::Compile { .. } | Error::Render { .. } => self,
            Error::Syntax(message) => Error::Compile {
                message,
                template: template.to_string(),
                line,
            },
            other => Error::Compile {
                message: other.to_string(),
                template: template.to_string(),
                line,
            },
        }
    }

    /// Attributes a node failure to a template line. Compile errors surfacing from
    /// templates loaded mid-render are already attributed and pass through too.
    pub(crate) fn at_render(self, template: &str, line: usize) -> Self {
        match self {
            Error::Compile { .. } | Error::Render { .. } => self,
            other => Error::Render {
                message: other.to_string(),
                template: template.to_string(),
                line,
            },
        }
    }
}

fn quoted(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("{:?}", n))
        .collect::<Vec<_>>()
        .join(", ")
}

impl serde::ser::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::Value(msg.to_string())
    }
}
