use super::*;
use serial_test::serial;
use std::env;

fn cleanup_test_env() {
    env::remove_var("KERNEL_IPC_MAX_PER_WINDOW");
    env::remove_var("KERNEL_IPC_WINDOW_MS");
    env::remove_var("KERNEL_MEMORY_ENABLE_VECTOR_SEARCH");
    env::remove_var("KERNEL_MEMORY_MAX_SHORT_TERM_SIZE");
    env::remove_var("KERNEL_TOOL_TIMEOUT_MS");
    env::remove_var("KERNEL_TOOL_RATE_LIMIT");
    env::remove_var("KERNEL_AUDIT_MAX_EVENTS");
    env::remove_var("KERNEL_ORCHESTRATOR_ATOMIC_TIMEOUT_MS");
    env::remove_var("KERNEL_ORCHESTRATOR_RETRY_BASE_MS");
    env::remove_var("KERNEL_ORCHESTRATOR_RETRY_CAP_MS");
    env::remove_var("KERNEL_ORCHESTRATOR_MAX_STORED_WORKFLOWS");
}

#[test]
fn default_config_needs_no_environment() {
    let config = KernelConfig::default();
    assert_eq!(config.ipc.max_per_window, DEFAULT_IPC_MAX_PER_WINDOW);
    assert_eq!(config.ipc.window_ms, DEFAULT_IPC_WINDOW_MS);
    assert_eq!(
        config.memory.max_short_term_size,
        DEFAULT_SHORT_TERM_CAPACITY
    );
    assert!(!config.memory.enable_vector_search);
    assert_eq!(config.tool.default_timeout_ms, DEFAULT_TOOL_TIMEOUT_MS);
    assert_eq!(config.tool.default_rate_limit, None);
    assert_eq!(config.audit.max_events, DEFAULT_AUDIT_MAX_EVENTS);
    assert_eq!(
        config.orchestrator.atomic_timeout_ms,
        DEFAULT_ATOMIC_TIMEOUT_MS
    );
    assert_eq!(
        config.orchestrator.retry_backoff_base_ms,
        RETRY_BACKOFF_BASE_MS
    );
    assert_eq!(
        config.orchestrator.retry_backoff_cap_ms,
        RETRY_BACKOFF_CAP_MS
    );
}

#[test]
#[serial]
fn load_falls_back_to_defaults_with_empty_environment() {
    cleanup_test_env();

    let config = KernelConfig::load().expect("defaults must always validate");
    assert_eq!(config.ipc.max_per_window, DEFAULT_IPC_MAX_PER_WINDOW);
    assert_eq!(config.audit.max_events, DEFAULT_AUDIT_MAX_EVENTS);

    cleanup_test_env();
}

#[test]
#[serial]
fn load_honors_environment_overrides() {
    cleanup_test_env();

    env::set_var("KERNEL_IPC_MAX_PER_WINDOW", "250");
    env::set_var("KERNEL_IPC_WINDOW_MS", "1000");
    env::set_var("KERNEL_MEMORY_ENABLE_VECTOR_SEARCH", "true");
    env::set_var("KERNEL_MEMORY_MAX_SHORT_TERM_SIZE", "5");
    env::set_var("KERNEL_TOOL_RATE_LIMIT", "30");
    env::set_var("KERNEL_AUDIT_MAX_EVENTS", "42");

    let config = KernelConfig::load().expect("overridden config must validate");
    assert_eq!(config.ipc.max_per_window, 250);
    assert_eq!(config.ipc.window_ms, 1000);
    assert!(config.memory.enable_vector_search);
    assert_eq!(config.memory.max_short_term_size, 5);
    assert_eq!(config.tool.default_rate_limit, Some(30));
    assert_eq!(config.audit.max_events, 42);

    cleanup_test_env();
}

#[test]
#[serial]
fn load_ignores_unparsable_values_and_keeps_default() {
    cleanup_test_env();

    env::set_var("KERNEL_IPC_MAX_PER_WINDOW", "not-a-number");

    let config = KernelConfig::load().expect("unparsable override falls back to default");
    assert_eq!(config.ipc.max_per_window, DEFAULT_IPC_MAX_PER_WINDOW);

    cleanup_test_env();
}

#[test]
#[serial]
fn load_rejects_zero_max_per_window() {
    cleanup_test_env();
    env::set_var("KERNEL_IPC_MAX_PER_WINDOW", "0");

    let result = KernelConfig::load();
    assert!(result.is_err());
    match result.unwrap_err() {
        KernelError::Configuration(msg) => {
            assert!(msg.contains("max_per_window"));
        }
        other => panic!("expected Configuration error, got {other:?}"),
    }

    cleanup_test_env();
}

#[test]
#[serial]
fn load_rejects_zero_short_term_capacity() {
    cleanup_test_env();
    env::set_var("KERNEL_MEMORY_MAX_SHORT_TERM_SIZE", "0");

    let result = KernelConfig::load();
    assert!(result.is_err());
    match result.unwrap_err() {
        KernelError::Configuration(msg) => {
            assert!(msg.contains("max_short_term_size"));
        }
        other => panic!("expected Configuration error, got {other:?}"),
    }

    cleanup_test_env();
}
