//! Remote service access: request/response shapes, the transport seam and
//! the request pipeline that normalizes failures.

mod error;
mod pipeline;
mod transport;
mod types;

pub use error::{ErrorKind, NormalizedError};
pub use pipeline::RequestPipeline;
pub use transport::{HttpTransport, Transport, TransportFailure};
pub use types::{ApiRequest, ApiResponse, Method};
