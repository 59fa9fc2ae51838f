//! Custom validation functions for configuration.

use regex::Regex;
use validator::ValidationError;

fn pattern(re: &str) -> Result<Regex, ValidationError> {
    Regex::new(re).map_err(|_| ValidationError::new("invalid_regex"))
}

/// Validate that an interface name follows Linux naming conventions.
pub fn validate_interface(name: &str) -> Result<(), ValidationError> {
    let re = pattern(r"^[a-zA-Z0-9_.\-:@]+$")?;
    if !name.is_empty() && name.len() <= 15 && re.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_interface"))
    }
}

/// Filters are handed to libpcap verbatim; only reject what it never accepts.
pub fn validate_filter(filter: &str) -> Result<(), ValidationError> {
    if filter.chars().any(|c| c.is_control()) {
        return Err(ValidationError::new("invalid_filter"));
    }
    Ok(())
}

pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let re = pattern(r"^(?i)(trace|debug|info|warn|error|off)$")?;
    if re.is_match(level) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interfaces() {
        for ok in ["eth0", "lo", "wlp3s0", "br-1a2b", "eth0.100", "any"] {
            assert!(validate_interface(ok).is_ok(), "{ok}");
        }
        for bad in ["", "eth 0", "averyveryverylongname0"] {
            assert!(validate_interface(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn filters_and_levels() {
        assert!(validate_filter("tcp port 80").is_ok());
        assert!(validate_filter("").is_ok());
        assert!(validate_filter("tcp\n").is_err());
        assert!(validate_log_level("DEBUG").is_ok());
        assert!(validate_log_level("verbose").is_err());
    }
}
