use crate::errors::{ServiceError, ServiceResult};

/// Number of characters shown in request previews
pub const PREVIEW_LENGTH: usize = 50;

/// Trim the text and collapse every whitespace run to a single space
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize `text` and check it is non-empty and within `max_length` characters
pub fn validate_text(text: &str, max_length: usize) -> ServiceResult<String> {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return Err(ServiceError::validation("text must not be empty"));
    }

    let length = normalized.chars().count();
    if length > max_length {
        return Err(ServiceError::validation(format!(
            "text is {} characters long, maximum is {}",
            length, max_length
        )));
    }

    Ok(normalized)
}

/// Shorten text for logs and request info
pub fn text_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_LENGTH {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(PREVIEW_LENGTH).collect();
    preview.push_str("...");
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  hello \t\n world  "), "hello world");
        assert_eq!(normalize_text("hello world"), "hello world");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_normalize_keeps_case() {
        assert_eq!(normalize_text("Hello World"), "Hello World");
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(matches!(validate_text("", 100), Err(ServiceError::Validation { .. })));
        assert!(matches!(validate_text(" \n\t ", 100), Err(ServiceError::Validation { .. })));
    }

    #[test]
    fn test_validate_length_limit_counts_characters() {
        assert!(validate_text("héllo", 5).is_ok());
        let err = validate_text("héllo!", 5).unwrap_err();
        assert!(err.to_string().contains("6 characters"));
    }

    #[test]
    fn test_validate_returns_normalized() {
        assert_eq!(validate_text("  a   b ", 10).unwrap(), "a b");
    }

    #[test]
    fn test_text_preview() {
        assert_eq!(text_preview("short"), "short");
        let long = "x".repeat(80);
        let preview = text_preview(&long);
        assert_eq!(preview.len(), PREVIEW_LENGTH + 3);
        assert!(preview.ends_with("..."));
    }
}
