//! Kernel configuration, loaded from environment variables with documented
//! defaults, following the same `env::var(...).unwrap_or_else(...)` style
//! the rest of the crate uses rather than a derive-based config loader.

use crate::constants::*;
use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[cfg(test)]
mod tests;

/// Top-level configuration for a [`crate::kernel::Kernel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    pub ipc: IpcConfig,
    pub memory: MemoryConfig,
    pub tool: ToolConfig,
    pub audit: AuditConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Maximum messages a single sender may dispatch within `window_ms`.
    pub max_per_window: u32,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub enable_vector_search: bool,
    pub max_short_term_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub default_timeout_ms: u64,
    /// Calls/minute; `None` means unlimited unless the tool itself declares one.
    pub default_rate_limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub max_events: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub atomic_timeout_ms: u64,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_cap_ms: u64,
    pub max_stored_workflows: usize,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_per_window: DEFAULT_IPC_MAX_PER_WINDOW,
            window_ms: DEFAULT_IPC_WINDOW_MS,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enable_vector_search: false,
            max_short_term_size: DEFAULT_SHORT_TERM_CAPACITY,
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            default_rate_limit: None,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_AUDIT_MAX_EVENTS,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            atomic_timeout_ms: DEFAULT_ATOMIC_TIMEOUT_MS,
            retry_backoff_base_ms: RETRY_BACKOFF_BASE_MS,
            retry_backoff_cap_ms: RETRY_BACKOFF_CAP_MS,
            max_stored_workflows: DEFAULT_MAX_STORED_WORKFLOWS,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ipc: IpcConfig::default(),
            memory: MemoryConfig::default(),
            tool: ToolConfig::default(),
            audit: AuditConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl KernelConfig {
    /// Load configuration from the process environment, falling back to
    /// `.env` if present, overriding defaults field by field.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("loaded .env file from: {:?}", path),
            Err(e) => tracing::debug!("no .env file loaded: {}", e),
        }

        let ipc = IpcConfig {
            max_per_window: env_parse("KERNEL_IPC_MAX_PER_WINDOW", DEFAULT_IPC_MAX_PER_WINDOW),
            window_ms: env_parse("KERNEL_IPC_WINDOW_MS", DEFAULT_IPC_WINDOW_MS),
        };

        let memory = MemoryConfig {
            enable_vector_search: env_parse("KERNEL_MEMORY_ENABLE_VECTOR_SEARCH", false),
            max_short_term_size: env_parse(
                "KERNEL_MEMORY_MAX_SHORT_TERM_SIZE",
                DEFAULT_SHORT_TERM_CAPACITY,
            ),
        };

        let tool = ToolConfig {
            default_timeout_ms: env_parse("KERNEL_TOOL_TIMEOUT_MS", DEFAULT_TOOL_TIMEOUT_MS),
            default_rate_limit: env::var("KERNEL_TOOL_RATE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok()),
        };

        let audit = AuditConfig {
            max_events: env_parse("KERNEL_AUDIT_MAX_EVENTS", DEFAULT_AUDIT_MAX_EVENTS),
        };

        let orchestrator = OrchestratorConfig {
            atomic_timeout_ms: env_parse(
                "KERNEL_ORCHESTRATOR_ATOMIC_TIMEOUT_MS",
                DEFAULT_ATOMIC_TIMEOUT_MS,
            ),
            retry_backoff_base_ms: env_parse(
                "KERNEL_ORCHESTRATOR_RETRY_BASE_MS",
                RETRY_BACKOFF_BASE_MS,
            ),
            retry_backoff_cap_ms: env_parse(
                "KERNEL_ORCHESTRATOR_RETRY_CAP_MS",
                RETRY_BACKOFF_CAP_MS,
            ),
            max_stored_workflows: env_parse(
                "KERNEL_ORCHESTRATOR_MAX_STORED_WORKFLOWS",
                DEFAULT_MAX_STORED_WORKFLOWS,
            ),
        };

        let config = Self {
            ipc,
            memory,
            tool,
            audit,
            orchestrator,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ipc.max_per_window == 0 {
            return Err(KernelError::Configuration(
                "ipc.max_per_window must be greater than zero".to_string(),
            ));
        }
        if self.memory.max_short_term_size == 0 {
            return Err(KernelError::Configuration(
                "memory.max_short_term_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
