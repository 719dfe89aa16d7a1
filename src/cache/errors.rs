/**
 * Errors raised by cache implementations
 */
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no index named `{0}`")]
    UnknownIndex(String),

    #[error("index `{index}` generated no key for object")]
    KeyNotGenerated { index: String },

    #[error("key `{key}` lies outside the owned prefix `{prefix}`")]
    KeyOutsidePrefix { key: String, prefix: String },

    #[error("no cached object with key `{0}`")]
    NotFound(String),

    #[error("replacement changed primary key from `{from}` to `{to}`")]
    KeyChanged { from: String, to: String },

    #[error("index `{index}` key `{key}` already belongs to `{owner}`")]
    IndexConflict {
        index: String,
        key: String,
        owner: String,
    },
}
