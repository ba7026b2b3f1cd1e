use std::io::Write;

use crewforge_core::config::{ApiKeyRole, AppConfig};
use crewforge_core::error::CrewForgeError;
use crewforge_crew::{CrewBuilder, InjectionTable};
use crewforge_test_utils::{agent_node, task_node, tool_node};
use serde_json::json;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
provider = "openai"
model_id = "gpt-4o-mini"
api_key = "sk-test-key"
max_tokens = 2048
temperature = 0.2

[bedrock]
region = "us-west-2"

[database]
path = "/tmp/crewforge-test/crewforge.db"

[gateway]
bind = "0.0.0.0:9999"
token = "test-token"

[[gateway.api_keys]]
name = "ci"
key = "rk_ci_key"
role = "admin"

[runner]
default_max_iterations = 5
task_timeout_secs = 300
tool_timeout_secs = 20

[credentials]
github_token = "ghp_test"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.model_id, "gpt-4o-mini");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 2048);
    assert_eq!(config.bedrock.region, "us-west-2");
    assert_eq!(
        config.database.resolved_path().to_str(),
        Some("/tmp/crewforge-test/crewforge.db")
    );

    assert_eq!(config.gateway.bind, "0.0.0.0:9999");
    assert_eq!(config.gateway.api_keys.len(), 1);
    assert_eq!(config.gateway.api_keys[0].role, ApiKeyRole::Admin);

    assert_eq!(config.runner.default_max_iterations, 5);
    assert_eq!(config.runner.task_timeout_secs, Some(300));
    assert_eq!(config.runner.tool_timeout_secs, 20);
    assert_eq!(config.credentials.github().as_deref(), Some("ghp_test"));
    assert!(config.email.is_none());
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("CREWFORGE_TEST_MODEL_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
api_key = "${CREWFORGE_TEST_MODEL_KEY}"
"#;
    let config = AppConfig::from_toml(toml_content).expect("parse");
    assert_eq!(config.model.api_key.as_deref(), Some("expanded-key-value"));

    std::env::remove_var("CREWFORGE_TEST_MODEL_KEY");
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");

    assert!(matches!(
        AppConfig::load(&path),
        Err(CrewForgeError::ConfigNotFound(_))
    ));
    let config = AppConfig::load_or_default(&path).expect("defaults");
    assert_eq!(config.gateway.bind, "127.0.0.1:8000");
}

#[test]
fn test_runner_settings_reach_compiled_agents() {
    let config = AppConfig::from_toml(
        r#"
[model]
api_key = "sk-test"

[runner]
default_max_iterations = 3
"#,
    )
    .expect("parse");

    let builder = CrewBuilder::from_config(&config);
    let mut agent = agent_node("a1");
    agent.parents = vec!["scraper".into()];
    let nodes = vec![
        agent,
        tool_node("scraper", json!("website_scraper")),
        task_node("t1", &["a1"]),
    ];

    let plan = builder.compile(&nodes).expect("compile").plan();
    assert_eq!(plan.agents[0].max_iterations, 3);
    assert_eq!(plan.agents[0].model, "gpt-4o-mini");
    assert_eq!(plan.tasks.len(), 1);
}

#[test]
fn test_injection_overrides_from_config() {
    let config = AppConfig::from_toml(
        r#"
[[injection."Serper Search"]]
field = "prompt"
input = "q"

[[injection."Website Scraper"]]
field = "file_name"
input = "website_url"
"#,
    )
    .expect("parse");

    let table = InjectionTable::with_overrides(&config.injection).expect("valid rules");
    assert_eq!(table.rules_for("Serper Search")[0].input, "q");
    assert_eq!(table.rules_for("Website Scraper").len(), 1);
    assert_eq!(table.rules_for("Web Search").len(), 2);

    let bad = AppConfig::from_toml(
        r#"
[[injection."Web Search"]]
field = "temperature"
input = "engine"
"#,
    )
    .expect("parse");
    assert!(InjectionTable::with_overrides(&bad.injection).is_err());
}
