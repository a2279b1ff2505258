//! Realtime Streaming Session Engine
//!
//! This crate manages one lifetime of a duplex voice conversation against the
//! OpenAI Realtime API. It is structured into submodules for clarity:
//!
//! - `events`: Typed wire events exchanged over the WebSocket connection.
//! - `transport`: The single persistent, ordered WebSocket channel.
//! - `audio`: Microphone capture and speaker playback via `cpal`.
//! - `session`: The turn-taking state machine that drives everything.
//! - `dispatch`: Registered-callback indirection for tool/function calls.
//! - `pcm`: Base64/PCM16 codec helpers shared by the above.
//! - `error`: The failures that cross this crate's API boundary.

pub mod audio;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod pcm;
pub mod session;
pub mod transport;

pub use dispatch::{ToolHandler, ToolRegistry};
pub use error::RealtimeError;
pub use events::{SessionConfig, ToolDefinition};
pub use session::{Session, SessionObserver, SessionOptions};
