use crewforge_core::config::AppConfig;
use crewforge_crew::InjectionTable;
use crewforge_store::SqliteWorkflowStore;

struct CheckResult {
    label: &'static str,
    ok: bool,
    detail: String,
}

impl CheckResult {
    fn ok(label: &'static str, detail: impl Into<String>) -> Self {
        Self {
            label,
            ok: true,
            detail: detail.into(),
        }
    }

    fn issue(label: &'static str, detail: impl Into<String>) -> Self {
        Self {
            label,
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Print a report of configuration health. Returns the number of issues.
pub fn run_doctor(config: &AppConfig) -> usize {
    let checks = vec![
        check_model(config),
        check_bedrock(config),
        check_search_keys(config),
        check_github(config),
        check_email(config),
        check_injection(config),
        check_database(config),
        check_gateway(config),
    ];

    let mut issues = 0;
    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if !check.ok {
            issues += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", checks.len() - issues, issues);
    issues
}

fn check_model(config: &AppConfig) -> CheckResult {
    let model = &config.model;
    if model.provider == "bedrock" {
        return CheckResult::ok("Model", format!("{} via Bedrock", model.model_id));
    }
    if config.model_api_key().is_some() || model.base_url.is_some() {
        CheckResult::ok("Model", format!("{} ({})", model.model_id, model.provider))
    } else {
        CheckResult::issue(
            "Model",
            format!(
                "no API key for {} (set model.api_key or OPENAI_API_KEY)",
                model.model_id
            ),
        )
    }
}

fn check_bedrock(config: &AppConfig) -> CheckResult {
    match config.bedrock.api_key() {
        Some(_) => CheckResult::ok("Bedrock", format!("region {}", config.bedrock.region)),
        None if config.model.provider == "bedrock" => {
            CheckResult::issue("Bedrock", "default model is Bedrock but no bedrock.api_key is set")
        }
        None => CheckResult::ok("Bedrock", "not configured; Bedrock model overrides will fail"),
    }
}

fn check_search_keys(config: &AppConfig) -> CheckResult {
    let creds = &config.credentials;
    let missing: Vec<&str> = [
        ("SERPER_API_KEY", creds.serper()),
        ("TAVILY_API_KEY", creds.tavily()),
    ]
    .into_iter()
    .filter(|(_, v)| v.is_none())
    .map(|(name, _)| name)
    .collect();

    match missing.len() {
        0 => CheckResult::ok("Search", "Serper and Tavily keys configured"),
        1 => CheckResult::ok("Search", format!("{} not set", missing[0])),
        _ => CheckResult::issue("Search", "no Serper or Tavily key; search tools will not build"),
    }
}

fn check_github(config: &AppConfig) -> CheckResult {
    if config.credentials.github().is_some() {
        CheckResult::ok("GitHub", "token configured")
    } else {
        CheckResult::ok("GitHub", "no token; code search disabled, issue/PR/repo search rate limited")
    }
}

fn check_email(config: &AppConfig) -> CheckResult {
    match &config.email {
        Some(email) if email.api_url.trim().is_empty() => {
            CheckResult::issue("Email", "email.api_url is empty")
        }
        Some(email) => CheckResult::ok("Email", format!("sending as {}", email.from_address)),
        None => CheckResult::ok("Email", "not configured; Email Sender unavailable"),
    }
}

fn check_injection(config: &AppConfig) -> CheckResult {
    match InjectionTable::with_overrides(&config.injection) {
        Ok(_) if config.injection.is_empty() => CheckResult::ok("Injection", "defaults"),
        Ok(_) => CheckResult::ok(
            "Injection",
            format!("{} override(s)", config.injection.len()),
        ),
        Err(e) => CheckResult::issue("Injection", e.to_string()),
    }
}

fn check_database(config: &AppConfig) -> CheckResult {
    let path = config.database.resolved_path();
    match SqliteWorkflowStore::open(&path) {
        Ok(_) => CheckResult::ok("Database", path.display().to_string()),
        Err(e) => CheckResult::issue("Database", format!("{}: {}", path.display(), e)),
    }
}

fn check_gateway(config: &AppConfig) -> CheckResult {
    let gw = &config.gateway;
    if gw.token.is_none() && gw.api_keys.is_empty() {
        CheckResult::issue(
            "Gateway",
            format!("{} has no authentication; every caller is admin", gw.bind),
        )
    } else {
        CheckResult::ok(
            "Gateway",
            format!("{} ({} api key(s))", gw.bind, gw.api_keys.len()),
        )
    }
}
