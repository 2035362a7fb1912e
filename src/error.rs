use thiserror::Error;

macro_rules! template_error {
    // Single string version
    ($template:expr, $msg:expr) => {
        crate::Error::Template {
            template: $template.to_string(),
            message: $msg.to_string(),
        }
    };

    // Format string with arguments version
    ($template:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::Template {
            template: $template.to_string(),
            message: format!($fmt, $($arg)*),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into a small number of classes, each with its own recovery policy:
///
/// ## Template Errors
/// - [`Error::Template`] - A bug template failed structural validation. The template is skipped
///   and loading continues with the remaining templates.
///
/// ## Index Errors
/// - [`Error::Index`] - The bytecode index of an application could not answer a query. The
///   evaluation of that application is aborted and reported as a per-application failure.
/// - [`Error::Signature`] - A class/method/field signature string could not be parsed.
///
/// ## Runtime Errors
/// - [`Error::Config`] - Invalid engine configuration
/// - [`Error::Worker`] - A worker could not be started, or an application killed its worker
///   on every attempt
/// - [`Error::Export`] - The graph exporter rejected a set of bindings
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Json`] - Template sources that are not valid JSON
///
/// An empty search result or an unreachable trace end-point is never an error; those are
/// ordinary unsatisfied verdicts.
///
/// # Examples
///
/// ```rust
/// use bugscope::{template::TemplateParser, Error};
///
/// match TemplateParser::new().parse_str("{\"METADATA\": {}}") {
///     Ok(_) => println!("loaded"),
///     Err(Error::Template { template, message }) => {
///         eprintln!("Skipping {}: {}", template, message);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A bug template is structurally invalid.
    ///
    /// # Fields
    ///
    /// * `template` - Name (or source path) of the offending template
    /// * `message` - Description of the violated rule
    #[error("Template {template}: {message}")]
    Template {
        /// The template name, or its path if the name could not be read
        template: String,
        /// The message to be printed for the Template error
        message: String,
    },

    /// The bytecode index failed to answer a query.
    ///
    /// Aborts the evaluation of the current application only.
    #[error("Index - {0}")]
    Index(String),

    /// A signature string does not follow the `Lpkg/Class;->name(args)ret` form.
    #[error("Invalid signature - {0}")]
    Signature(String),

    /// The engine configuration is invalid.
    #[error("Configuration - {0}")]
    Config(String),

    /// A worker could not be spawned, or kept dying on the same application.
    #[error("Worker - {0}")]
    Worker(String),

    /// The graph exporter failed.
    #[error("Export - {0}")]
    Export(String),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while reading templates or configuration.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// A template source was not valid JSON.
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
