pub const HEADER_TRACE_ID: &str = "X-Trace-Id";
pub const HEADER_REQUEST_ID: &str = "X-Request-Id";

pub const CONVERSATIONS_PATH: &str = "conversations";
pub const MESSAGES_SEGMENT: &str = "messages";

pub const USER_AGENT: &str = concat!("care-inbox/", env!("CARGO_PKG_VERSION"));
