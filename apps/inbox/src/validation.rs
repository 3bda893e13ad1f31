use validator::ValidationError;

use crate::messaging::domain::{Conversation, ConversationStatus, MAX_BODY_CHARS};

const MAX_E164_DIGITS: usize = 15;
const MAX_TEMPLATE_ID_LEN: usize = 64;

pub fn validate_message_body(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("message_body_empty"));
    }
    // SMS limits count characters, not bytes.
    if value.chars().count() > MAX_BODY_CHARS {
        return Err(ValidationError::new("message_body_length"));
    }
    Ok(())
}

pub fn validate_template_id(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_TEMPLATE_ID_LEN {
        return Err(ValidationError::new("template_id_length"));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::new("template_id_chars"));
    }
    Ok(())
}

/// `+` followed by 1 to 15 digits, no leading zero.
pub fn validate_e164(value: &str) -> Result<(), ValidationError> {
    let Some(digits) = value.strip_prefix('+') else {
        return Err(ValidationError::new("phone_missing_plus"));
    };
    if digits.is_empty() || digits.len() > MAX_E164_DIGITS {
        return Err(ValidationError::new("phone_length"));
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) || digits.starts_with('0') {
        return Err(ValidationError::new("phone_digits"));
    }
    Ok(())
}

/// Checks that a coordinator may text this patient right now.
pub fn validate_can_message(conversation: &Conversation) -> Result<(), ValidationError> {
    if conversation.opted_out {
        return Err(ValidationError::new("patient_opted_out"));
    }
    if conversation.status == ConversationStatus::Archived {
        return Err(ValidationError::new("conversation_archived"));
    }
    validate_e164(&conversation.patient_phone)
}

pub fn describe(error: &ValidationError) -> String {
    match error.code.as_ref() {
        "message_body_empty" => "message body is empty".to_string(),
        "message_body_length" => format!("message body exceeds {MAX_BODY_CHARS} characters"),
        "template_id_length" | "template_id_chars" => "template id is malformed".to_string(),
        "phone_missing_plus" | "phone_length" | "phone_digits" => {
            "patient phone number is not in E.164 format".to_string()
        }
        "patient_opted_out" => "patient has opted out of SMS".to_string(),
        "conversation_archived" => "conversation is archived".to_string(),
        other => other.to_string(),
    }
}
