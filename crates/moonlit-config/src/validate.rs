use std::net::IpAddr;

use crate::config::Config;
use crate::error::ConfigError;

/// Validate a [`Config`], returning all detected violations.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.server.port == 0 {
        errors.push(ConfigError::Validation {
            field: "server.port".to_string(),
            message: "must not be 0".to_string(),
        });
    }

    if config.server.bind_address.parse::<IpAddr>().is_err() {
        errors.push(ConfigError::Validation {
            field: "server.bind_address".to_string(),
            message: format!("not an IP address: '{}'", config.server.bind_address),
        });
    }

    if let Err(e) = regex::Regex::new(&config.debugger.error_filter) {
        errors.push(ConfigError::Validation {
            field: "debugger.error_filter".to_string(),
            message: e.to_string(),
        });
    }

    let ext = &config.debugger.temp_extension;
    if ext.is_empty() || ext.starts_with('.') {
        errors.push(ConfigError::Validation {
            field: "debugger.temp_extension".to_string(),
            message: format!("must be non-empty without a leading dot, got '{ext}'"),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn zero_port_rejected() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(format!("{}", errs[0]).contains("server.port"));
    }

    #[test]
    fn hostname_bind_address_rejected() {
        let mut cfg = Config::default();
        cfg.server.bind_address = "localhost".into();
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(format!("{}", errs[0]).contains("server.bind_address"));
    }

    #[test]
    fn ipv6_bind_address_allowed() {
        let mut cfg = Config::default();
        cfg.server.bind_address = "::1".into();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn bad_error_filter_rejected() {
        let mut cfg = Config::default();
        cfg.debugger.error_filter = "(unclosed".into();
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(format!("{}", errs[0]).contains("debugger.error_filter"));
    }

    #[test]
    fn dotted_extension_rejected() {
        let mut cfg = Config::default();
        cfg.debugger.temp_extension = ".lua".into();
        assert!(validate(&cfg).is_err());
        cfg.debugger.temp_extension = String::new();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn multiple_errors_returned() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        cfg.server.bind_address = "nope".into();
        cfg.debugger.error_filter = "[".into();
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 3);
    }
}
