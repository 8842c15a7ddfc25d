//! Remote translation gateway for the OneHourTranslation (OHT) API.
//!
//! The host application supplies its job store, mapping store and document
//! converter through the traits in [`host`]; [`gateway::Gateway`] does the
//! rest: submission, webhook handling and polling reconciliation.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod host;
pub mod language;
pub mod memory;
pub mod retrieval;
pub mod retry;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod submission;

pub use config::Config;
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use gateway::{CallbackFields, Collaborators, Gateway, NotificationOutcome};
pub use host::{
    DocumentConverter, Job, JobId, JobItem, JobItemId, JobItemState, JobSettings, JobStore,
    MessageLevel, RemoteMapping, RemoteMappingStore, TranslatedData,
};
