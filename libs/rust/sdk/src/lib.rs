//! Host-side interfaces for secrets engines.
//!
//! An engine is instantiated per mount and receives its collaborators as
//! trait objects:
//! - [`Storage`](storage::Storage) for persistent key-value data, with the
//!   [`wal`] primitive built on top of it
//! - [`SystemView`](system::SystemView) for password policies, plugin
//!   versions and the rotation manager
//! - [`EventSender`](events::EventSender) for observation events
//!
//! It also carries the request/response model, the typed field framework and
//! the username template language shared by engines and database plugins.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod framework;
pub mod logical;
pub mod storage;
pub mod system;
pub mod template;
pub mod wal;

pub use error::{SdkError, SdkResult};
pub use events::{Event, EventSender};
pub use logical::{Operation, Request, Response, Secret};
pub use storage::{InmemStorage, Storage, StorageEntry};
pub use system::{PluginVersion, RotationJob, RotationSchedule, SystemView};
pub use template::StringTemplate;
