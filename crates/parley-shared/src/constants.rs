/// Application name
pub const APP_NAME: &str = "Parley";

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Maximum text length of a single message in bytes
pub const MAX_TEXT_LEN: usize = 4096;

/// Maximum size of one inbound WebSocket frame (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default HTTP/WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Query parameter carrying the session token on the upgrade request
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Outbound event names
pub const EVENT_ONLINE_USER: &str = "onlineUser";
pub const EVENT_MESSAGE_USER: &str = "message-user";
pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_CONVERSATION: &str = "conversation";

/// Maximum characters of message text shown in a sidebar preview
pub const PREVIEW_LEN: usize = 100;
