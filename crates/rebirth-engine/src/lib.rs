pub mod check;
pub mod classify;
pub mod client;
pub mod compress;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod relay;
pub mod transport;

pub use check::{check_credentials, CHECK_ROUTE};
pub use classify::classify;
pub use client::{GenerationClient, RawResponse};
pub use compress::{compress, CompressionTarget};
pub use config::EngineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{Invocation, Pipeline};
pub use relay::{RelayHandler, RelayResponse};
pub use transport::{build, OutgoingRequest, RequestBuilder, Transport};
