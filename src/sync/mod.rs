pub mod builder;
pub mod collection;
pub mod config;
pub mod lifecycle;
pub mod stats;
pub mod synchronizer;
pub mod transform;

pub use builder::{SyncOverride, SynchronizerBuilder};
pub use collection::{EventStream, ListOptions, RemoteCollection, Snapshot};
pub use config::SyncConfig;
pub use lifecycle::{Lifecycle, Phase};
pub use stats::{EventStats, ReconcileStats, SyncStats};
pub use synchronizer::Synchronizer;
pub use transform::{FnTransform, Identity, Transform, TypedResource};
