//! Availability checks for configured CLI agents.
//!
//! An agent is available when `<command> --version` exits with code 0. The
//! first non-empty line of its output is reported as the version.

use crate::cli_agent::CliAgent;
use devbench_core::AgentConfig;
use devbench_core::process::{CommandSpec, run_with_deadline};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// How long a version check may take.
pub const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Outcome of probing one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAvailability {
    pub id: String,
    pub command: String,
    pub status: AgentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStatus {
    /// Reported version line (may be empty when the tool prints nothing).
    Available(String),
    /// Why the check failed.
    Unavailable(String),
}

impl AgentAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self.status, AgentStatus::Available(_))
    }
}

impl fmt::Display for AgentAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            AgentStatus::Available(version) => {
                write!(f, "✓ {} ({}) {}", self.id, self.command, version)
            }
            AgentStatus::Unavailable(reason) => {
                write!(f, "✗ {} ({}) {}", self.id, self.command, reason)
            }
        }
    }
}

/// Runs `<command> --version` for one agent.
pub async fn check_agent(id: &str, agent: &CliAgent, timeout: Duration) -> AgentAvailability {
    let mut spec = CommandSpec::new(&agent.command).arg("--version");
    for (key, value) in &agent.env {
        spec = spec.env(key, value);
    }

    let status = match run_with_deadline(&spec, timeout).await {
        Ok(output) if output.success() => {
            AgentStatus::Available(first_line(&output.stdout, &output.stderr))
        }
        Ok(output) => AgentStatus::Unavailable(format!(
            "--version exited with {:?}: {}",
            output.exit_code,
            first_line(&output.stderr, &output.stdout)
        )),
        Err(err) => AgentStatus::Unavailable(err.to_string()),
    };

    let availability = AgentAvailability {
        id: id.to_string(),
        command: agent.command.clone(),
        status,
    };
    debug!(
        agent = id,
        command = %agent.command,
        available = availability.is_available(),
        "Agent availability check"
    );
    availability
}

/// Checks every configured agent, in configuration order.
pub async fn check_agents(agents: &[AgentConfig]) -> Vec<AgentAvailability> {
    let mut results = Vec::with_capacity(agents.len());
    for config in agents {
        let availability = match CliAgent::from_config(config) {
            Ok(agent) => check_agent(&config.id, &agent, VERSION_CHECK_TIMEOUT).await,
            Err(err) => AgentAvailability {
                id: config.id.clone(),
                command: config.command.clone().unwrap_or_default(),
                status: AgentStatus::Unavailable(err.to_string()),
            },
        };
        results.push(availability);
    }
    results
}

fn first_line(primary: &str, fallback: &str) -> String {
    primary
        .lines()
        .chain(fallback.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}
