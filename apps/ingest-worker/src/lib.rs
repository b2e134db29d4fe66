pub mod anomaly;
pub mod bootstrap;
pub mod config;
pub mod detect;
pub mod fetch;
pub mod ingest;
pub mod measurement;
pub mod normalize;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod ukey;
