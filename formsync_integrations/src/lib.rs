//! Concrete provider clients for `formsync_core`.

pub mod providers;

pub use providers::http::HttpProviderClient;
