//! File store backends for the document pipeline.
//!
//! Uploaded case files live either on the local filesystem or behind a remote
//! file gateway; the pipeline only ever fetches them by storage path. A
//! missing file is a distinct, terminal condition (`FileStoreError::NotFound`)
//! and must stay distinguishable from transient backend failures.

pub mod factory;
pub mod http;
pub mod local;
pub mod traits;

pub use factory::create_file_store;
pub use http::HttpFileStore;
pub use local::LocalFileStore;
pub use traits::{FileStore, FileStoreError, FileStoreResult};
