//!
//! sqldock storage module
//! ----------------------
//! In-memory persistence for the dispatch core: the query record store
//! (one record per dispatched execution, forward-only lifecycle) and the
//! results backend (opaque-keyed, write-once result sets with TTL expiry).
//!
//! Both stores are cheap cloneable handles around shared state, in the same
//! spirit as the shared store handle the rest of the service passes around.

pub mod queries;
pub mod results_backend;

pub use queries::{QueryRecord, QueryStatus, QueryStore};
pub use results_backend::{opaque_key, ResultsBackend, StoredResult};
