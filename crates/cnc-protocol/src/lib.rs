//! Wire types shared by the hub, browser UIs and collection agents.
//!
//! Every message on the WebSocket is a JSON envelope of the form
//! `{"type": <discriminant>, "payload": <type-specific>}`:
//!
//! | type          | direction     | payload                         |
//! |---------------|---------------|---------------------------------|
//! | `subscribe`   | both          | `{topics: [string]}`            |
//! | `data`        | both          | `{rules?: [Rule], agents?: [..]}` |
//! | `rule.insert` | client -> hub | `{rule: Rule, after?: int}`     |
//! | `rule.delete` | client -> hub | `{id: int}`                     |

pub mod agent;
pub mod error;
pub mod message;
pub mod rule;

pub use agent::{Agent, LabelSet};
pub use error::ProtocolError;
pub use message::{
    ClientMessage, DataPayload, RuleDeletePayload, RuleInsertPayload, ServerMessage,
    SubscribePayload,
};
pub use rule::{Action, MatchOp, Matcher, Rule, Selector};

/// Topic carrying the ordered rule list.
pub const TOPIC_RULES: &str = "rules";

/// Topic carrying the agent inventory.
pub const TOPIC_AGENTS: &str = "agents";
