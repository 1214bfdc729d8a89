//! # mutation-server-client
//!
//! Rust client for a mutation-testing engine that runs as a child process
//! and speaks JSON-RPC 2.0 over a local TCP socket.
//!
//! ## Architecture
//!
//! - **Process** (stdout/stderr): the engine is spawned, its output is
//!   forwarded to a [`Logger`], and its port is read from the
//!   `Server is listening on port: <n>` banner
//! - **Transport** (TCP): newline-delimited JSON frames to `localhost:<port>`
//! - **RPC**: requests are correlated to responses by id; `progress`
//!   notifications are routed to subscribers by token
//!
//! ## Example
//!
//! ```ignore
//! use mutation_server_client::{InstrumentParams, MutateParams, MutationServerBuilder};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mutation_server_client::Result<()> {
//!     let server = MutationServerBuilder::new("mutation-server")
//!         .working_directory("/workspace")
//!         .create()
//!         .await?;
//!
//!     let mutants = server.instrument(InstrumentParams::default()).await?;
//!     println!("{} mutants", mutants.len());
//!
//!     server
//!         .mutate(
//!             MutateParams::new("run-1"),
//!             |partial| println!("{} mutants finished", partial.mutants.len()),
//!             CancellationToken::new(),
//!         )
//!         .await?;
//!
//!     server.dispose();
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod logger;
pub mod model;
pub mod process;
pub mod protocol;
pub mod rpc;
pub mod server;
pub mod transport;
pub mod writer;

mod sync;

pub use config::{ConnectionConfig, ServerConfig};
pub use connection::Connection;
pub use error::{MutationServerError, Result};
pub use logger::{Logger, SharedLogger, TracingLogger};
pub use model::{
    InstrumentParams, Location, MutantResult, MutantStatus, MutateParams, MutatePartialResult,
    Position,
};
pub use protocol::{ProgressParams, ProgressToken};
pub use rpc::ProgressStream;
pub use server::{MutationServer, MutationServerBuilder, ServerState};
