use shared_proto::ClientEvent;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct JoinRequest {
    #[validate(length(min = 1, max = 128))]
    pub id: String,
    #[validate(length(min = 1, max = 64), custom(function = "validate_display_name"))]
    pub name: String,
    #[validate(email, length(max = 255))]
    pub email: Option<String>,
}

impl JoinRequest {
    pub fn normalized(id: String, name: String, email: Option<String>) -> Self {
        Self {
            id: id.trim().to_string(),
            name: normalize_display_name(&name),
            email: email
                .map(|value| normalize_email(&value))
                .filter(|value| !value.is_empty()),
        }
    }

    pub fn into_event(self) -> ClientEvent {
        ClientEvent::JoinRoom {
            id: self.id,
            name: self.name,
            email: self.email,
        }
    }
}

pub fn validate_display_name(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("display_name_empty"));
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::new("display_name_chars"));
    }
    Ok(())
}

pub fn normalize_display_name(value: &str) -> String {
    value.trim().to_string()
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}
