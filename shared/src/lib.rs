pub mod admin_service;
pub mod client_identity;
pub mod http;
pub mod metrics_defs;
