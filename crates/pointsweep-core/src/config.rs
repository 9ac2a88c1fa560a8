use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a variable is present but its value is invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a variable is present but its value is invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so tests can drive it with a
/// `HashMap` lookup instead of `set_var`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let env = parse_environment(&or_default("POINTSWEEP_ENV", "development"))?;
    let log_level = or_default("POINTSWEEP_LOG_LEVEL", "info");
    let sites_path = PathBuf::from(or_default("POINTSWEEP_SITES_PATH", "./config/sites.yaml"));
    let output_path = PathBuf::from(or_default(
        "POINTSWEEP_OUTPUT_PATH",
        "./data/campaigns.json",
    ));
    let checkpoint_path = PathBuf::from(or_default(
        "POINTSWEEP_CHECKPOINT_PATH",
        "./data/checkpoint.json",
    ));

    let navigation_timeout_secs = parse_u64("POINTSWEEP_NAVIGATION_TIMEOUT_SECS", "45")?;
    if navigation_timeout_secs == 0 {
        return Err(invalid(
            "POINTSWEEP_NAVIGATION_TIMEOUT_SECS",
            "must be greater than zero".to_string(),
        ));
    }

    let user_agent = or_default("POINTSWEEP_USER_AGENT", DEFAULT_USER_AGENT);
    let inter_request_delay_ms = parse_u64("POINTSWEEP_INTER_REQUEST_DELAY_MS", "2000")?;

    let max_pages_per_category = parse_u32("POINTSWEEP_MAX_PAGES_PER_CATEGORY", "50")?;
    if max_pages_per_category == 0 {
        return Err(invalid(
            "POINTSWEEP_MAX_PAGES_PER_CATEGORY",
            "must be at least 1".to_string(),
        ));
    }

    let global_retry_threshold = or_default("POINTSWEEP_GLOBAL_RETRY_THRESHOLD", "0.3")
        .parse::<f64>()
        .map_err(|e| invalid("POINTSWEEP_GLOBAL_RETRY_THRESHOLD", e.to_string()))?;
    if !(0.0..=1.0).contains(&global_retry_threshold) {
        return Err(invalid(
            "POINTSWEEP_GLOBAL_RETRY_THRESHOLD",
            format!("{global_retry_threshold} is outside 0..=1"),
        ));
    }

    let max_global_retries = parse_u32("POINTSWEEP_MAX_GLOBAL_RETRIES", "2")?;

    let browser_sandbox = match or_default("POINTSWEEP_BROWSER_SANDBOX", "true").as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        other => {
            return Err(invalid(
                "POINTSWEEP_BROWSER_SANDBOX",
                format!("expected true or false, got '{other}'"),
            ))
        }
    };

    Ok(AppConfig {
        env,
        log_level,
        sites_path,
        output_path,
        checkpoint_path,
        navigation_timeout_secs,
        user_agent,
        inter_request_delay_ms,
        max_pages_per_category,
        global_retry_threshold,
        max_global_retries,
        browser_sandbox,
    })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "POINTSWEEP_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
