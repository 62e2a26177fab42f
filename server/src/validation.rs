use crate::error::ApiError;

/// Maximum length, in characters, of a chat message or TTS text.
pub const MAX_TEXT_LENGTH: usize = 5000;

/// Validate a chat message (HTTP or WebSocket).
pub fn validate_chat_request(message: &str) -> Result<(), ApiError> {
    validate_text(message, "Message")
}

/// Validate TTS request
pub fn validate_tts_request(text: &str) -> Result<(), ApiError> {
    validate_text(text, "Text")
}

fn validate_text(text: &str, what: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!("{what} cannot be empty")));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "{what} too long (max {MAX_TEXT_LENGTH} characters)"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tts_request_valid() {
        assert!(validate_tts_request("Hello").is_ok());
        assert!(validate_tts_request(&"ä".repeat(MAX_TEXT_LENGTH)).is_ok());
    }

    #[test]
    fn test_validate_tts_request_empty_text() {
        let result = validate_tts_request("  ");
        if let Err(ApiError::InvalidInput(msg)) = result {
            assert!(msg.contains("empty"));
        } else {
            panic!("expected InvalidInput");
        }
    }

    #[test]
    fn test_validate_chat_request_too_long() {
        let long_text = "a".repeat(6000);
        let result = validate_chat_request(&long_text);
        if let Err(ApiError::InvalidInput(msg)) = result {
            assert!(msg.contains("too long"));
        } else {
            panic!("expected InvalidInput");
        }
    }
}
