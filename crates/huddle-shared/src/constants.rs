/// Maximum message content length in characters
pub const MAX_MESSAGE_LEN: usize = 5_000;

/// Minimum chat name length
pub const MIN_CHAT_NAME_LEN: usize = 2;

/// Maximum chat name length
pub const MAX_CHAT_NAME_LEN: usize = 100;

/// Maximum chat description length
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Default page size for chat listings
pub const DEFAULT_CHAT_PAGE_SIZE: u32 = 20;

/// Default page size for message history
pub const DEFAULT_MESSAGE_PAGE_SIZE: u32 = 50;

/// Hard cap on any requested page size
pub const MAX_PAGE_SIZE: u32 = 100;

/// Per-connection outbound event queue depth; a connection that falls this
/// far behind starts dropping events
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Default HTTP listen port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
