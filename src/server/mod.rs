pub mod context;
pub mod handler;
pub mod protocol;
pub mod ws;

pub use context::AppContext;
pub use handler::OperationHandler;
pub use protocol::{
    ClientMessage, GitOperationRequest, GitOperationResult, GitRequest, GitResponse,
    RequestEnvelope, ServerMessage, PROTOCOL_VERSION,
};
pub use ws::{router, run_server, serve};
