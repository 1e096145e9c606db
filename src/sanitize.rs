// ============================================================================
// Security Filter
// ============================================================================
//
// Second, independent inspection layer behind the syntactic validator.
// Defends the outbound mail path against:
// - header injection (CR/LF smuggled into fields that end up in headers)
// - markup/script injection into the message the coach reads
// - control-character payloads and oversized fields that slipped past an
//   out-of-sync validator
//
// The rule list is ordered data, not code, so individual rules can be
// audited and unit-tested on their own. A failed verdict is logged with the
// violated rule tags and the hashed caller identity; the caller only ever
// sees a generic rejection.
//
// ============================================================================

use crate::utils::strip_markup;
use crate::validate::ContactRequest;

// Defense-in-depth ceilings (bytes). Deliberately looser than the
// validator's bounds; tripping one of these means the layers disagree.
const CEILING_NAME: usize = 200;
const CEILING_EMAIL: usize = 320;
const CEILING_SUBJECT: usize = 400;
const CEILING_BODY: usize = 4000;

/// One named security rule over the contact payload
pub struct SecurityRule {
    /// Stable tag recorded in abuse logs, never sent to the caller
    pub tag: &'static str,
    pub violates: fn(&ContactRequest) -> bool,
}

/// Ordered rule list. Every rule is evaluated so abuse logs carry the
/// complete violation picture for a payload.
pub const SECURITY_RULES: &[SecurityRule] = &[
    SecurityRule {
        tag: "crlf-in-email",
        violates: |req| has_line_breaks(&req.sender_email),
    },
    SecurityRule {
        tag: "crlf-in-subject",
        violates: |req| has_line_breaks(&req.subject),
    },
    SecurityRule {
        tag: "script-markup",
        violates: |req| {
            has_script_markup(&req.sender_name)
                || has_script_markup(&req.subject)
                || has_script_markup(&req.body)
        },
    },
    SecurityRule {
        tag: "control-chars",
        violates: |req| {
            has_forbidden_control_chars(&req.sender_name)
                || has_forbidden_control_chars(&req.sender_email)
                || has_forbidden_control_chars(&req.subject)
                || has_forbidden_control_chars(&req.body)
        },
    },
    SecurityRule {
        tag: "length-ceiling",
        violates: |req| {
            req.sender_name.len() > CEILING_NAME
                || req.sender_email.len() > CEILING_EMAIL
                || req.subject.len() > CEILING_SUBJECT
                || req.body.len() > CEILING_BODY
        },
    },
];

/// Verdict of the security filter, including normalized copies of the
/// textual fields for downstream mail composition. Ephemeral.
#[derive(Debug)]
pub struct SanitizationVerdict {
    pub safe: bool,
    /// Tags of every violated rule, for abuse logging only
    pub violations: Vec<&'static str>,
    pub sender_name: String,
    pub sender_email: String,
    pub subject: String,
    pub body: String,
}

/// Inspect a validated contact request against the rule list.
pub fn inspect(request: &ContactRequest) -> SanitizationVerdict {
    let violations: Vec<&'static str> = SECURITY_RULES
        .iter()
        .filter(|rule| (rule.violates)(request))
        .map(|rule| rule.tag)
        .collect();

    SanitizationVerdict {
        safe: violations.is_empty(),
        violations,
        sender_name: strip_markup(&request.sender_name),
        sender_email: request.sender_email.clone(),
        subject: strip_markup(&request.subject),
        body: strip_markup(&request.body),
    }
}

/// CR or LF anywhere in the field - the classic mail header injection vector
fn has_line_breaks(field: &str) -> bool {
    field.contains('\r') || field.contains('\n')
}

/// Script-bearing markup in a field the coach will read
fn has_script_markup(field: &str) -> bool {
    let lowered = field.to_lowercase();
    const MARKERS: &[&str] = &[
        "<script",
        "</script",
        "<iframe",
        "<object",
        "<embed",
        "javascript:",
        "onerror=",
        "onload=",
        "onclick=",
    ];
    MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// ASCII control characters other than ordinary text whitespace
fn has_forbidden_control_chars(field: &str) -> bool {
    field
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
}
