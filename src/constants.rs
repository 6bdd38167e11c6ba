//! System-wide default values. Each can be overridden via [`crate::config::KernelConfig`];
//! these are the fallbacks used when a config value is absent.

/// Default IPC sender rate-limit quota per window.
pub const DEFAULT_IPC_MAX_PER_WINDOW: u32 = 100;
/// Default IPC rate-limit window size.
pub const DEFAULT_IPC_WINDOW_MS: u64 = 60_000;

/// Default short-term memory capacity before FIFO overflow into long-term.
pub const DEFAULT_SHORT_TERM_CAPACITY: usize = 50;

/// Default tool invocation timeout.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;
/// Tool rate-limit window; fixed at 60s per spec (sliding 60s window).
pub const TOOL_RATE_LIMIT_WINDOW_MS: u64 = 60_000;

/// Default bound on the audit ring buffer.
pub const DEFAULT_AUDIT_MAX_EVENTS: usize = 10_000;
/// Default page size for filtered audit reads.
pub const DEFAULT_AUDIT_READ_LIMIT: usize = 100;

/// Default atomic-task handler timeout.
pub const DEFAULT_ATOMIC_TIMEOUT_MS: u64 = 30_000;
/// Retry backoff base delay.
pub const RETRY_BACKOFF_BASE_MS: u64 = 200;
/// Retry backoff cap.
pub const RETRY_BACKOFF_CAP_MS: u64 = 5_000;

/// Default cap on the orchestrator's retained completed-workflow history.
pub const DEFAULT_MAX_STORED_WORKFLOWS: usize = 10_000;

/// Reserved tag used for broadcast ACL filtering.
pub const BROADCAST_TAG: &str = "broadcast";

/// Dimensionality of the bag-of-words embedding stub.
pub const EMBEDDING_DIMENSIONS: usize = 100;
