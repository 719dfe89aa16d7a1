pub mod cache;
pub mod error;
pub mod k8s;
pub mod sync;

pub use error::{Error, Result};
