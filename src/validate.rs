// ============================================================================
// Contact Payload Validation
// ============================================================================
//
// First pipeline layer after rate limiting: syntactic and schema checks on
// the inbound contact form. Every rule runs independently and the result
// aggregates all field errors, so a caller sees the complete set of
// problems in one round trip instead of fixing them one at a time.
//
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use uuid::Uuid;

// Field bounds (characters, after trimming)
const NAME_MIN: usize = 2;
const NAME_MAX: usize = 100;
const EMAIL_MAX: usize = 254;
const SUBJECT_MIN: usize = 3;
const SUBJECT_MAX: usize = 200;
const BODY_MIN: usize = 10;
const BODY_MAX: usize = 2000;

/// Inbound contact form as posted by the visitor.
///
/// Missing fields deserialize as empty strings so the validator still runs
/// every rule and reports the full error set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawContactInput {
    pub email: String,
    pub subject: String,
    pub message: String,
    pub sender_name: String,
}

/// Validated, trimmed contact request. Exists only for the duration of one
/// relay call and is never persisted.
#[derive(Debug, Clone)]
pub struct ContactRequest {
    pub recipient_id: Uuid,
    pub sender_name: String,
    pub sender_email: String,
    pub subject: String,
    pub body: String,
}

/// Aggregate validation result
#[derive(Debug)]
pub struct ValidationOutcome {
    /// Per-field errors, keyed by the JSON field name the client posted
    pub errors: BTreeMap<String, String>,
    /// Present only when `errors` is empty
    pub request: Option<ContactRequest>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates the contact payload together with the recipient id path
/// segment. A malformed id is a validation error, not a lookup miss.
pub fn validate(recipient_id: &str, raw: &RawContactInput) -> ValidationOutcome {
    let mut errors = BTreeMap::new();

    let sender_name = raw.sender_name.trim();
    if let Err(msg) = validate_sender_name(sender_name) {
        errors.insert("senderName".to_string(), msg);
    }

    let email = raw.email.trim();
    if let Err(msg) = validate_email(email) {
        errors.insert("email".to_string(), msg);
    }

    let subject = raw.subject.trim();
    if let Err(msg) = validate_subject(subject) {
        errors.insert("subject".to_string(), msg);
    }

    let body = raw.message.trim();
    if let Err(msg) = validate_body(body) {
        errors.insert("message".to_string(), msg);
    }

    let parsed_id = match Uuid::parse_str(recipient_id.trim()) {
        Ok(id) => Some(id),
        Err(_) => {
            errors.insert(
                "recipientId".to_string(),
                "Recipient id is not a valid identifier".to_string(),
            );
            None
        }
    };

    let request = if errors.is_empty() {
        parsed_id.map(|recipient_id| ContactRequest {
            recipient_id,
            sender_name: sender_name.to_string(),
            sender_email: email.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        })
    } else {
        None
    };

    ValidationOutcome { errors, request }
}

/// Validates the visitor's display name (trimmed length 2-100)
fn validate_sender_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Name is required".to_string());
    }
    if name.chars().count() < NAME_MIN {
        return Err(format!("Name must be at least {} characters long", NAME_MIN));
    }
    if name.chars().count() > NAME_MAX {
        return Err(format!("Name must not exceed {} characters", NAME_MAX));
    }
    Ok(())
}

/// Validates email syntax: local-part@domain with at least one interior dot
/// in the domain, no whitespace, total length <= 254.
fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > EMAIL_MAX {
        return Err(format!("Email must not exceed {} characters", EMAIL_MAX));
    }
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("Email must not contain whitespace".to_string());
    }

    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => return Err("Email must contain exactly one @".to_string()),
    };

    if local.is_empty() {
        return Err("Email is missing the part before @".to_string());
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err("Email domain is not valid".to_string());
    }

    Ok(())
}

/// Validates the subject line (trimmed length 3-200)
fn validate_subject(subject: &str) -> Result<(), String> {
    if subject.chars().count() < SUBJECT_MIN {
        return Err(format!(
            "Subject must be at least {} characters long",
            SUBJECT_MIN
        ));
    }
    if subject.chars().count() > SUBJECT_MAX {
        return Err(format!("Subject must not exceed {} characters", SUBJECT_MAX));
    }
    Ok(())
}

/// Validates the message body (trimmed length 10-2000)
fn validate_body(body: &str) -> Result<(), String> {
    if body.chars().count() < BODY_MIN {
        return Err(format!(
            "Message must be at least {} characters long",
            BODY_MIN
        ));
    }
    if body.chars().count() > BODY_MAX {
        return Err(format!("Message must not exceed {} characters", BODY_MAX));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_input() -> RawContactInput {
        RawContactInput {
            email: "visitor@example.com".to_string(),
            subject: "Training plan question".to_string(),
            message: "I would like to ask about your strength program.".to_string(),
            sender_name: "Jamie Visitor".to_string(),
        }
    }

    const COACH_ID: &str = "7f7a3b1e-8c43-4c5f-9a61-52b76c0cb2a4";

    #[test]
    fn test_valid_payload_produces_trimmed_request() {
        let mut raw = valid_input();
        raw.sender_name = "  Jamie Visitor  ".to_string();
        raw.subject = " Training plan question ".to_string();

        let outcome = validate(COACH_ID, &raw);
        assert!(outcome.is_valid(), "errors: {:?}", outcome.errors);

        let request = outcome.request.unwrap();
        assert_eq!(request.sender_name, "Jamie Visitor");
        assert_eq!(request.subject, "Training plan question");
        assert_eq!(request.recipient_id.to_string(), COACH_ID);
    }

    #[test]
    fn test_all_field_errors_are_aggregated() {
        let raw = RawContactInput {
            email: "not-an-email".to_string(),
            subject: "ab".to_string(),
            message: "short".to_string(),
            sender_name: "".to_string(),
        };

        let outcome = validate(COACH_ID, &raw);
        assert!(!outcome.is_valid());
        assert_eq!(outcome.errors.len(), 4);
        assert!(outcome.errors.contains_key("senderName"));
        assert!(outcome.errors.contains_key("email"));
        assert!(outcome.errors.contains_key("subject"));
        assert!(outcome.errors.contains_key("message"));
        assert!(outcome.request.is_none());
    }

    #[test]
    fn test_malformed_recipient_id_is_a_field_error() {
        let outcome = validate("coach-42", &valid_input());
        assert!(!outcome.is_valid());
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors.contains_key("recipientId"));
    }

    #[test]
    fn test_missing_fields_still_report_every_rule() {
        // Simulates a body of {} - serde defaults leave all fields empty
        let outcome = validate("", &RawContactInput::default());
        assert_eq!(outcome.errors.len(), 5);
    }

    #[test]
    fn test_email_rules() {
        assert!(validate_email("visitor@example.com").is_ok());
        assert!(validate_email("a.b+c@sub.example.co").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("plainaddress").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("visitor@nodot").is_err());
        assert!(validate_email("visitor@.com").is_err());
        assert!(validate_email("two@@example.com").is_err());
        assert!(validate_email("spaced visitor@example.com").is_err());

        let long_local = "a".repeat(250);
        assert!(validate_email(&format!("{}@ex.co", long_local)).is_err());
    }

    #[test]
    fn test_name_bounds() {
        assert!(validate_sender_name("Jo").is_ok());
        assert!(validate_sender_name("J").is_err());
        assert!(validate_sender_name(&"x".repeat(100)).is_ok());
        assert!(validate_sender_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_body_bounds() {
        assert!(validate_body(&"x".repeat(10)).is_ok());
        assert!(validate_body(&"x".repeat(9)).is_err());
        assert!(validate_body(&"x".repeat(2000)).is_ok());
        assert!(validate_body(&"x".repeat(2001)).is_err());
    }
}
