use crate::cache::CacheError;
use derive_more::From;
use k8s_openapi::serde_json;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    #[from]
    Cache(CacheError),

    #[from]
    Io(std::io::Error),

    #[from]
    Join(tokio::task::JoinError),

    /// The watch stream delivered an `ERROR` event
    WatchEvent { code: u16, reason: String, message: String },

    /// The watch stream ended without a shutdown request
    WatchClosed,

    /// `build()` was called without a remote collection
    MissingCollection,

    /// `start()` was called on a synchronizer that is already running
    AlreadyStarted,

    /// Readiness was awaited on a synchronizer that was never started
    NotStarted,

    /// The synchronizer stopped before it finished its first reconciliation
    Stopped,

    /// Custom error message
    Custom(String),
}

impl Error {
    /// `410 Gone`: the resume token is older than what the server retains
    #[must_use]
    pub const fn is_expired_token(&self) -> bool {
        matches!(self, Self::WatchEvent { code: 410, .. })
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}
