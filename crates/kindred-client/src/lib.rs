pub mod clipboard;
pub mod config;
pub mod conversation;
pub mod error;
pub mod session;
pub mod state;
pub mod status;

use tracing_subscriber::{fmt, EnvFilter};

pub use clipboard::{Clipboard, MemoryClipboard};
pub use config::ClientConfig;
pub use conversation::{ConversationView, MessageActions, MessageView};
pub use error::ClientError;
pub use session::StaticSession;
pub use state::{ActiveSession, AppState};
pub use status::{Status, StatusKind, StatusLine};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("kindred_client=debug,kindred_realtime=debug,kindred_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
