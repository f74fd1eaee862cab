use regex::Regex;
use crate::errors::{AppError, AppResult};

pub struct InputValidator;

impl InputValidator {
    pub fn validate_endpoint_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("endpoint_url", "Endpoint URL cannot be empty"));
        }

        if trimmed.len() > 2048 {
            return Err(AppError::validation("endpoint_url", "Endpoint URL too long"));
        }

        let endpoint_pattern = Regex::new(r"^https?://[A-Za-z0-9.\-]+(:\d{1,5})?(/[^\s]*)?$").unwrap();
        if !endpoint_pattern.is_match(trimmed) {
            return Err(AppError::invalid_endpoint(trimmed));
        }

        // The pattern is permissive; let reqwest have the final word
        if reqwest::Url::parse(trimmed).is_err() {
            return Err(AppError::invalid_endpoint(trimmed));
        }

        Ok(())
    }

    pub fn validate_api_key(key: &str) -> AppResult<()> {
        let trimmed = key.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("api_key", "API key cannot be empty"));
        }

        if trimmed.len() > 128 {
            return Err(AppError::validation("api_key", "API key too long (max 128 characters)"));
        }

        let key_chars = Regex::new(r"^[A-Za-z0-9\-_]+$").unwrap();
        if !key_chars.is_match(trimmed) {
            return Err(AppError::validation("api_key", "API key contains invalid characters"));
        }

        Ok(())
    }

    pub fn validate_resource_handle(handle: &str) -> AppResult<()> {
        if handle.trim().is_empty() {
            return Err(AppError::validation("resource_handle", "Resource handle cannot be empty"));
        }

        if handle.contains('\0') {
            return Err(AppError::validation("resource_handle", "Resource handle contains a NUL byte"));
        }

        Ok(())
    }

    pub fn validate_field_name(field: &str, value: &str) -> AppResult<()> {
        let field_chars = Regex::new(r"^[A-Za-z0-9\-_]+$").unwrap();
        if !field_chars.is_match(value) {
            return Err(AppError::validation(field, "Must be a non-empty form field name"));
        }
        Ok(())
    }

    /// Keep the API key out of logs; only the last four characters survive.
    pub fn mask_api_key(key: &str) -> String {
        let chars: Vec<char> = key.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let visible: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len() - 4), visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_validation() {
        assert!(InputValidator::validate_endpoint_url("http://imgur.com/api/upload.json").is_ok());
        assert!(InputValidator::validate_endpoint_url("http://127.0.0.1:8080/upload").is_ok());
        assert!(InputValidator::validate_endpoint_url("").is_err());
        assert!(InputValidator::validate_endpoint_url("ftp://imgur.com/upload").is_err());

        match InputValidator::validate_endpoint_url("not a url") {
            Err(AppError::InvalidEndpoint { url }) => assert_eq!(url, "not a url"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_api_key_validation() {
        assert!(InputValidator::validate_api_key("347ec991d0079db6").is_ok());
        assert!(InputValidator::validate_api_key("   ").is_err());
        assert!(InputValidator::validate_api_key("key with spaces").is_err());
        assert!(InputValidator::validate_api_key(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_resource_handle_validation() {
        assert!(InputValidator::validate_resource_handle("/tmp/cat.png").is_ok());
        assert!(InputValidator::validate_resource_handle("").is_err());
        assert!(InputValidator::validate_resource_handle("bad\0path").is_err());
    }

    #[test]
    fn test_mask_api_key() {
        assert_eq!(InputValidator::mask_api_key("abcdef123"), "*****f123");
        assert_eq!(InputValidator::mask_api_key("abc"), "***");
        assert_eq!(InputValidator::mask_api_key(""), "");
    }
}
