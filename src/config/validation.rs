use crate::config::types::{
    Config, FetchConfig, OutputConfig, RetryConfig, SchedulerConfig, SeedEntry, UserAgentConfig,
};
use crate::url::normalize_url;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_retry_config(&config.retry)?;
    validate_fetch_config(&config.fetch)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_seeds(&config.seeds)?;
    Ok(())
}

/// Validates scheduler configuration
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 256 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 256, got {}",
            config.workers
        )));
    }

    if config.max_in_flight < 1 {
        return Err(ConfigError::Validation(format!(
            "max_in_flight must be >= 1, got {}",
            config.max_in_flight
        )));
    }

    if config.retry_drain_batch < 1 {
        return Err(ConfigError::Validation(format!(
            "retry_drain_batch must be >= 1, got {}",
            config.retry_drain_batch
        )));
    }

    if config.max_park_ms < 1 {
        return Err(ConfigError::Validation(
            "max_park_ms must be >= 1ms".to_string(),
        ));
    }

    if config.snapshot_every < 1 {
        return Err(ConfigError::Validation(format!(
            "snapshot_every must be >= 1, got {}",
            config.snapshot_every
        )));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if !config.multiplier.is_finite() || config.multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "multiplier must be a finite number >= 1.0, got {}",
            config.multiplier
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base_delay_ms ({}) cannot exceed max_delay_ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    Ok(())
}

/// Validates fetch configuration
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.timeout_ms < 1 || config.connect_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "fetch timeouts must be >= 1ms".to_string(),
        ));
    }
    Ok(())
}

/// Validates user agent configuration
///
/// The crawler name ends up in the `User-Agent` header, so it is limited to
/// alphanumerics and hyphens.
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    let name = config.crawler_name.as_str();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return Err(ConfigError::Validation(format!(
            "user-agent crawler-name must be non-empty alphanumerics and hyphens, got '{}'",
            name
        )));
    }

    Url::parse(&config.contact_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("user-agent contact-url '{}': {}", config.contact_url, e))
    })?;

    validate_email(&config.contact_email)
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates seed entries
fn validate_seeds(seeds: &[SeedEntry]) -> Result<(), ConfigError> {
    if seeds.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[seed]] is required".to_string(),
        ));
    }

    for seed in seeds {
        normalize_url(&seed.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed.url, e))
        })?;

        if let Some(hint) = &seed.hint {
            if hint.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Seed '{}' has an empty hint",
                    seed.url
                )));
            }
        }
    }

    Ok(())
}

/// Checks for `local@domain.tld` with exactly one `@`
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.contains('@') && domain.contains('.')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "user-agent contact-email is not an email address: '{}'",
            email
        )))
    }
}
