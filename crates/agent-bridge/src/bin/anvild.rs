//! The headless modeling daemon: requests on stdin, responses on stdout,
//! logs on stderr. Configuration comes from the environment; argument
//! parsing belongs to outer tooling.

use std::io::{stdin, stdout};
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use agent_bridge::{serve, Core};
use anvil_types::{AgentId, CoreConfig, RoleRuleset};

fn config_from_env() -> CoreConfig {
    let mut config = CoreConfig::default();
    if let Ok(dir) = std::env::var("ANVIL_DATA_DIR") {
        if !dir.is_empty() {
            config.data_dir = Some(dir.into());
        }
    }
    if let Some(n) = env_usize("ANVIL_WORKERS") {
        config.worker_threads = n.max(1);
    }
    if let Some(n) = env_usize("ANVIL_QUEUE_DEPTH") {
        config.queue_depth = n.max(1);
    }
    if let Some(secs) = env_usize("ANVIL_HANDLER_BUDGET_SECS") {
        config.handler_budget = Duration::from_secs(secs as u64);
    }
    if let Some(n) = env_usize("ANVIL_ANGULAR_SEGMENTS") {
        config.angular_segments = n;
    }
    config
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn ruleset_from_env() -> RoleRuleset {
    match std::env::var("ANVIL_ROLE_RULESET") {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            eprintln!("ignoring malformed ANVIL_ROLE_RULESET: {e}");
            RoleRuleset::unrestricted()
        }),
        Err(_) => RoleRuleset::unrestricted(),
    }
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let agent = AgentId::new(
        std::env::var("ANVIL_AGENT_ID").unwrap_or_else(|_| "agent".to_string()),
    );
    let core = Core::new(config_from_env()).map_err(|e| {
        std::io::Error::other(format!("core failed to open: {e}"))
    })?;

    serve(
        &core,
        stdin().lock(),
        stdout(),
        agent,
        ruleset_from_env(),
    )
}
