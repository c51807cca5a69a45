// Medflow LLM - Remote-model clients and backend health management
//
// Implements the `ModelClient` and `ModelBackends` abstractions from
// medflow-core: an HTTP client for OpenAI-compatible endpoints, a mock
// client for tests, and the health manager that routes stages across the
// endpoint pool.

pub mod backend;
pub mod http;
pub mod mock;

pub use backend::{BackendConfig, BackendHealthManager, EndpointConfig, StageHealth};
pub use http::HttpModelClient;
pub use mock::MockModelClient;
