//! # telechat-server
//!
//! Telnet chat server with an HTTP facade.
//!
//! - **Session** - Per-connection state machine and command dispatch
//! - **Server** - Admission control and the telnet accept loop
//! - **Api** - `POST /chat`, `GET /chat` and `GET /health`
//! - **Store** - SQLite chat history
//! - **Logging** - Console and daily file output

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod session;
pub mod store;

pub use config::{Args, Config};
pub use server::{open_store, run_server, serve_telnet, AppState};
pub use session::{Session, SessionState};
pub use store::SqliteStore;
