//! Process-wide settings.
//!
//! Initialized once at startup (environment variables over defaults) and
//! threaded through explicitly; nothing here mutates after init.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub app_name: String,
    /// "development" relaxes the write gate when no tokens are configured.
    pub environment: String,
    pub database_url: String,
    /// Comma-separated bearer tokens allowed to hit write operations.
    pub admin_api_tokens: String,
    pub rate_limit_per_minute: u32,
    pub log_level: String,
    pub cors_allowed_origins: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            app_name: "Holdout".to_string(),
            environment: "development".to_string(),
            database_url: "holdout.db".to_string(),
            admin_api_tokens: String::new(),
            rate_limit_per_minute: 120,
            log_level: "info".to_string(),
            cors_allowed_origins: "http://localhost:3000,http://127.0.0.1:3000".to_string(),
        }
    }
}

impl Settings {
    /// Read settings from `HOLDOUT_*` environment variables, keeping the
    /// default for anything unset.
    pub fn from_env() -> Settings {
        let defaults = Settings::default();
        Settings {
            app_name: env_or("HOLDOUT_APP_NAME", defaults.app_name),
            environment: env_or("HOLDOUT_ENVIRONMENT", defaults.environment),
            database_url: env_or("HOLDOUT_DATABASE_URL", defaults.database_url),
            admin_api_tokens: env_or("HOLDOUT_ADMIN_API_TOKENS", defaults.admin_api_tokens),
            rate_limit_per_minute: env_or(
                "HOLDOUT_RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute.to_string(),
            )
            .parse()
            .unwrap_or(defaults.rate_limit_per_minute),
            log_level: env_or("HOLDOUT_LOG_LEVEL", defaults.log_level),
            cors_allowed_origins: env_or(
                "HOLDOUT_CORS_ALLOWED_ORIGINS",
                defaults.cors_allowed_origins,
            ),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn admin_tokens(&self) -> Vec<String> {
        split_csv(&self.admin_api_tokens)
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        split_csv(&self.cors_allowed_origins)
    }

    /// Whether a write request holding `token` may proceed.
    ///
    /// Development with no tokens configured bypasses the gate entirely;
    /// otherwise the token must match one of the configured ones.
    pub fn write_gate_open(&self, token: Option<&str>) -> bool {
        let tokens = self.admin_tokens();
        if tokens.is_empty() {
            return self.is_development();
        }
        match token {
            Some(token) => tokens
                .iter()
                .any(|allowed| constant_time_eq(token.as_bytes(), allowed.as_bytes())),
            None => false,
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default,
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_gate_development_without_tokens() {
        let settings = Settings::default();
        assert!(settings.write_gate_open(None));
        assert!(settings.write_gate_open(Some("anything")));
    }

    #[test]
    fn test_write_gate_with_tokens() {
        let settings = Settings {
            admin_api_tokens: "alpha,beta".to_string(),
            ..Settings::default()
        };
        assert!(settings.write_gate_open(Some("alpha")));
        assert!(settings.write_gate_open(Some("beta")));
        assert!(!settings.write_gate_open(Some("gamma")));
        assert!(!settings.write_gate_open(None));
    }

    #[test]
    fn test_write_gate_closed_in_production_without_tokens() {
        let settings = Settings {
            environment: "production".to_string(),
            ..Settings::default()
        };
        assert!(!settings.write_gate_open(Some("anything")));
    }

    #[test]
    fn test_csv_parsing_trims_and_drops_empties() {
        let settings = Settings {
            admin_api_tokens: " alpha , ,beta,".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.admin_tokens(), vec!["alpha", "beta"]);
    }
}
