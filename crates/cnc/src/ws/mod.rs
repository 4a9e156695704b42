//! WebSocket sessions.
//!
//! Each upgraded connection becomes one hub session:
//!
//! ```text
//!   socket ──▶ reader (handler task) ──HubEvent──▶ hub
//!   socket ◀── writer task ◀── outbound queue ◀── hub
//! ```
//!
//! The path decides the role: `/ws/grafana-agent` connects a collection
//! agent, `/ws` and `/ws/ui` connect a UI.

mod handler;

pub use handler::ws_handler;
