//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use validator::ValidationError;

/// Validate that a given value is a power of two.
pub fn validate_power_of_two(value: usize) -> Result<(), ValidationError> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_power_of_two"))
    }
}

/// Validate that a cluster name follows the expected naming conventions.
pub fn validate_cluster_name(name: &str) -> Result<(), ValidationError> {
    let valid = !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    let re = regex::Regex::new("^[a-z0-9][a-z0-9-]*$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;

    if valid && re.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_cluster_name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_wellformed_cluster_names() {
        assert!(validate_cluster_name("default").is_ok());
        assert!(validate_cluster_name("mesh-east-1").is_ok());
    }

    #[test]
    fn rejects_malformed_cluster_names() {
        assert!(validate_cluster_name("").is_err());
        assert!(validate_cluster_name("-leading").is_err());
        assert!(validate_cluster_name("Uppercase").is_err());
    }
}
