use crewforge_core::config::{ApiKeyRole, GatewayConfig};

/// Identity attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub name: String,
    pub role: ApiKeyRole,
}

impl AuthResult {
    fn admin(name: &str) -> Self {
        Self {
            name: name.to_string(),
            role: ApiKeyRole::Admin,
        }
    }
}

/// Bearer token -> api_keys -> legacy token -> anonymous.
///
/// Anonymous callers are admitted as admin only when neither api keys nor a
/// legacy token are configured.
pub fn validate_auth(config: &GatewayConfig, bearer: Option<&str>) -> Option<AuthResult> {
    let Some(bearer) = bearer else {
        if config.token.is_none() && config.api_keys.is_empty() {
            return Some(AuthResult::admin("anonymous"));
        }
        return None;
    };

    if let Some(key) = config.api_keys.iter().find(|k| k.key == bearer) {
        return Some(AuthResult {
            name: key.name.clone(),
            role: key.role.clone(),
        });
    }
    if config.token.as_deref() == Some(bearer) {
        return Some(AuthResult::admin("legacy-token"));
    }
    None
}

/// Pull the token out of an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub fn has_viewer_access(role: &ApiKeyRole) -> bool {
    matches!(role, ApiKeyRole::Viewer | ApiKeyRole::Operator | ApiKeyRole::Admin)
}

pub fn has_operator_access(role: &ApiKeyRole) -> bool {
    matches!(role, ApiKeyRole::Operator | ApiKeyRole::Admin)
}
