use std::path::PathBuf;

use ahrian_core::config::AppConfig;
use ahrian_core::types::*;

/// A plan numbered from 1 in the order given.
pub fn plan(steps: &[(AgentKind, &str)]) -> Plan {
    Plan::new(
        steps
            .iter()
            .enumerate()
            .map(|(i, (agent, task))| PlanStep::new(i as u32 + 1, *agent, *task))
            .collect(),
    )
}

/// Maps lookup followed by synthesis.
pub fn cafes_plan() -> Plan {
    plan(&[
        (AgentKind::Maps, "Find cafes near Central Park"),
        (AgentKind::Orchestrator, "Recommend the best cafes from the results"),
    ])
}

pub fn clarification(options: &[(&str, &str)]) -> Clarification {
    Clarification::new(
        "Which one did you mean?",
        options
            .iter()
            .map(|(key, value)| ClarificationOption::new(*key, *value))
            .collect(),
    )
}

/// A sheet with `n` data rows under a `name,rating,address` header.
pub fn sheet_with_rows(n: usize) -> SheetData {
    SheetData::new(
        vec!["name".into(), "rating".into(), "address".into()],
        (1..=n)
            .map(|i| {
                vec![
                    format!("Cafe {}", i),
                    format!("4.{}", i % 10),
                    format!("{} Park Ave, New York", i),
                ]
            })
            .collect(),
    )
}

pub fn source(uri: &str, agent: AgentKind) -> GroundingSource {
    GroundingSource::new(uri, format!("Title for {}", uri), agent)
}

/// Parse a config from inline TOML.
pub fn config_from_toml(content: &str) -> AppConfig {
    toml::from_str(content).unwrap()
}

/// Write `content` to a config file inside a fresh temp dir.
///
/// Keep the returned dir alive for as long as the path is used.
pub fn temp_config(content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ahrian.toml");
    std::fs::write(&path, content).unwrap();
    (dir, path)
}
