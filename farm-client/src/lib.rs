//! Client side of the build-farm: the server registry, single-server request
//! dispatch, concurrent fan-out and the per-session credential orchestrator.

pub mod challenge;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod executor;
pub mod metrics_defs;
pub mod orchestrator;
pub mod registry;

#[cfg(test)]
mod testutils;

pub use challenge::{ChallengeError, ChallengeVerifier, HttpChallengeVerifier};
pub use codec::{Decoded, RawResponse, ResponseMode, Schema, strip_ansi};
pub use config::{ChallengeConfig, ServerConfig, UpstreamTimeouts};
pub use dispatcher::{ApiRequest, ApiVersion, Dispatcher, InvalidPath, build_http_client, check_path};
pub use errors::{ClientError, Result};
pub use executor::{FanOutExecutor, Outcome};
pub use orchestrator::{AuthState, Credentials, LoginOutcome, Orchestrator, SyncOutcome};
pub use registry::{RegistryError, ServerDescriptor, ServerRegistry};
