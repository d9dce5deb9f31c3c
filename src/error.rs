//! Error types shared across the host.

use crate::fetch::FetchError;

/// Errors surfaced by the micro-app host.
///
/// Load failures are normally not returned to callers: the loader logs them,
/// records them on the app and emits a lifecycle event. They still get a
/// variant here so that `MicroApp::load_error` can report them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MicroAppError {
    /// The application document itself could not be fetched.
    #[error("failed to fetch document '{url}': {source}")]
    DocumentFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    /// One stylesheet or script in a phase batch could not be fetched.
    #[error("failed to fetch resource '{url}': {source}")]
    ResourceFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    /// An app with this name is still registered.
    #[error("a micro app named '{0}' is already registered")]
    DuplicateInstanceName(String),

    /// Constructor arguments were missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The script runtime rejected or threw while running code.
    #[error("script error: {0}")]
    Script(String),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T, E = MicroAppError> = std::result::Result<T, E>;
