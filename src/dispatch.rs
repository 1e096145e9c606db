// ============================================================================
// Relay Dispatcher
// ============================================================================
//
// Orchestrates the contact pipeline as a strictly sequential state machine:
//
//   RECEIVED -> RATE_CHECKED -> VALIDATED -> SANITIZED
//            -> RECIPIENT_RESOLVED -> DISPATCHED
//
// Each stage's failure is terminal: later stages never run, so a rejected
// request does no recipient lookups and leaks nothing about later-stage
// state. Delivery is attempted exactly once per call; a failed attempt has
// already consumed the sender's rate-limit slot.
//
// ============================================================================

use chrono::{DateTime, Utc};
use relay_error::AppError;

use crate::context::AppContext;
use crate::directory::ResolveError;
use crate::mailer::OutboundEmail;
use crate::metrics::{
    CONTACTS_DISPATCHED_TOTAL, CONTACTS_REJECTED_TOTAL, DISPATCH_DURATION_SECONDS,
};
use crate::sanitize;
use crate::utils::log_safe_id;
use crate::validate::{self, RawContactInput};

/// Pipeline stages, in execution order. Used as log/metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    Received,
    RateChecked,
    Validated,
    Sanitized,
    RecipientResolved,
    Dispatched,
}

impl RelayStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::RateChecked => "rate_checked",
            Self::Validated => "validated",
            Self::Sanitized => "sanitized",
            Self::RecipientResolved => "recipient_resolved",
            Self::Dispatched => "dispatched",
        }
    }
}

/// Returned to the caller on success. Carries only what the response
/// contract needs - never the recipient's address.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub recipient_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Run one contact request through the full pipeline.
///
/// `client_key` is the caller's network identity (or the "unknown"
/// sentinel); it keys the rate limiter and is only ever logged hashed.
pub async fn dispatch_contact(
    ctx: &AppContext,
    client_key: &str,
    recipient_id: &str,
    raw: RawContactInput,
) -> Result<DispatchReceipt, AppError> {
    let timer = DISPATCH_DURATION_SECONDS.start_timer();
    let salt = &ctx.config.logging.hash_salt;
    let sender_hash = log_safe_id(client_key, salt);

    // Stage 1: rate limit, before any other work (DoS protection)
    let decision = ctx.rate_limiter.check(client_key).await;
    if !decision.allowed {
        CONTACTS_REJECTED_TOTAL.with_label_values(&["rate_limit"]).inc();
        tracing::warn!(
            sender_hash = %sender_hash,
            stage = RelayStage::RateChecked.as_str(),
            retry_after_secs = decision.retry_after_secs,
            "Contact rate limit exceeded"
        );
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    // Stage 2: syntactic validation, aggregated per field
    let outcome = validate::validate(recipient_id, &raw);
    let Some(request) = outcome.request else {
        CONTACTS_REJECTED_TOTAL.with_label_values(&["validation"]).inc();
        tracing::debug!(
            sender_hash = %sender_hash,
            stage = RelayStage::Validated.as_str(),
            fields = ?outcome.errors.keys().collect::<Vec<_>>(),
            "Contact payload failed validation"
        );
        return Err(AppError::Validation(outcome.errors));
    };

    // Stage 3: security filter
    let verdict = sanitize::inspect(&request);
    if !verdict.safe {
        CONTACTS_REJECTED_TOTAL.with_label_values(&["unsafe"]).inc();
        // Full rule detail goes to the abuse log; the caller gets a
        // generic rejection
        tracing::warn!(
            sender_hash = %sender_hash,
            stage = RelayStage::Sanitized.as_str(),
            violations = ?verdict.violations,
            "Contact payload rejected by security filter"
        );
        return Err(AppError::UnsafeContent);
    }

    // Stage 4: recipient resolution and authorization
    let recipient = match ctx.resolver.resolve(request.recipient_id).await {
        Ok(recipient) => recipient,
        Err(ResolveError::NotFound) => {
            CONTACTS_REJECTED_TOTAL.with_label_values(&["recipient"]).inc();
            tracing::debug!(
                sender_hash = %sender_hash,
                stage = RelayStage::RecipientResolved.as_str(),
                recipient_hash = %log_safe_id(&request.recipient_id.to_string(), salt),
                "Recipient absent or not contactable"
            );
            return Err(AppError::RecipientNotFound);
        }
        Err(ResolveError::Misconfigured(detail)) => {
            CONTACTS_REJECTED_TOTAL.with_label_values(&["recipient"]).inc();
            tracing::error!(
                stage = RelayStage::RecipientResolved.as_str(),
                detail = %detail,
                "Contactable recipient has no deliverable address"
            );
            return Err(AppError::RecipientMisconfigured(detail));
        }
        Err(ResolveError::Directory(e)) => {
            CONTACTS_REJECTED_TOTAL.with_label_values(&["recipient"]).inc();
            tracing::error!(error = %e, "Directory lookup failed");
            return Err(AppError::internal(format!("directory lookup failed: {}", e)));
        }
    };

    // Stage 5: single delivery attempt, no retry
    let mail = OutboundEmail {
        to: recipient.email.clone(),
        reply_to: verdict.sender_email,
        reply_to_name: verdict.sender_name,
        subject: verdict.subject,
        text_body: verdict.body,
    };

    if let Err(e) = ctx.mailer.send(&mail).await {
        CONTACTS_REJECTED_TOTAL.with_label_values(&["delivery"]).inc();
        tracing::error!(
            error = %e,
            sender_hash = %sender_hash,
            recipient_hash = %log_safe_id(&recipient.email, salt),
            "Mail delivery failed"
        );
        return Err(AppError::DeliveryFailed(e.to_string()));
    }

    CONTACTS_DISPATCHED_TOTAL.inc();
    timer.observe_duration();

    tracing::info!(
        sender_hash = %sender_hash,
        recipient_hash = %log_safe_id(&recipient.email, salt),
        stage = RelayStage::Dispatched.as_str(),
        "Contact message relayed"
    );

    Ok(DispatchReceipt {
        recipient_name: recipient.display_name,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LoggingConfig, MailConfig, RateStoreKind, SecurityConfig};
    use crate::directory::{Recipient, RecipientDirectory, RecipientRole};
    use crate::mailer::Mailer;
    use crate::rate_limit::{MemoryRateStore, RateLimiter};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct FixtureDirectory {
        coach: Recipient,
    }

    #[async_trait]
    impl RecipientDirectory for FixtureDirectory {
        async fn find_recipient_by_id(&self, id: Uuid) -> Result<Option<Recipient>> {
            Ok((id == self.coach.id).then(|| self.coach.clone()))
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    struct RecordingMailer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, _mail: &OutboundEmail) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("provider unavailable")
            }
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            port: 0,
            database_url: "postgres://unused".to_string(),
            redis_url: "redis://unused".to_string(),
            rate_store: RateStoreKind::Memory,
            security: SecurityConfig {
                max_contacts_per_window: 5,
                contact_window_secs: 3600,
                metrics_auth_enabled: false,
                metrics_bearer_token: None,
            },
            mail: MailConfig {
                api_url: "https://mail.invalid".to_string(),
                api_token: "unused".to_string(),
                from_address: "contact@certs.example".to_string(),
                from_name: "Coach Contact".to_string(),
                timeout_secs: 1,
            },
            logging: LoggingConfig {
                hash_salt: "test-salt".to_string(),
            },
        }
    }

    fn coach() -> Recipient {
        Recipient {
            id: Uuid::new_v4(),
            display_name: "Alex Coach".to_string(),
            email: "alex.coach@example.com".to_string(),
            role: RecipientRole::Coach,
        }
    }

    fn context(coach: Recipient, fail_delivery: bool) -> (AppContext, Arc<RecordingMailer>) {
        let mailer = Arc::new(RecordingMailer {
            calls: AtomicUsize::new(0),
            fail: fail_delivery,
        });
        let ctx = AppContext::new(
            Arc::new(test_config()),
            RateLimiter::new(
                Arc::new(MemoryRateStore::new()),
                5,
                Duration::from_secs(3600),
            ),
            Arc::new(FixtureDirectory { coach }),
            mailer.clone(),
        );
        (ctx, mailer)
    }

    fn valid_input() -> RawContactInput {
        RawContactInput {
            email: "visitor@example.com".to_string(),
            subject: "Training plan question".to_string(),
            message: "I would like to ask about your strength program.".to_string(),
            sender_name: "Jamie Visitor".to_string(),
        }
    }

    #[tokio::test]
    async fn test_happy_path_returns_receipt() {
        let coach = coach();
        let coach_id = coach.id.to_string();
        let (ctx, mailer) = context(coach, false);

        let receipt = dispatch_contact(&ctx, "203.0.113.9", &coach_id, valid_input())
            .await
            .unwrap();

        assert_eq!(receipt.recipient_name, "Alex Coach");
        assert_eq!(mailer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_attempted_exactly_once() {
        let coach = coach();
        let coach_id = coach.id.to_string();
        let (ctx, mailer) = context(coach, true);

        let err = dispatch_contact(&ctx, "203.0.113.9", &coach_id, valid_input())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DeliveryFailed(_)));
        assert_eq!(mailer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_still_consumes_a_rate_slot() {
        let coach = coach();
        let coach_id = coach.id.to_string();
        let (ctx, _mailer) = context(coach, true);

        // Burn all five slots on failing deliveries
        for _ in 0..5 {
            let err = dispatch_contact(&ctx, "203.0.113.9", &coach_id, valid_input())
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::DeliveryFailed(_)));
        }

        // The sixth call is now rejected by the limiter, not the mailer
        let err = dispatch_contact(&ctx, "203.0.113.9", &coach_id, valid_input())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_unsafe_payload_never_reaches_resolution_or_delivery() {
        let coach = coach();
        let coach_id = coach.id.to_string();
        let (ctx, mailer) = context(coach, false);

        let mut input = valid_input();
        input.subject = "Hi\r\nBcc: attacker@evil.com".to_string();

        let err = dispatch_contact(&ctx, "203.0.113.9", &coach_id, input)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UnsafeContent));
        assert_eq!(mailer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_precedes_validation() {
        let coach = coach();
        let coach_id = coach.id.to_string();
        let (ctx, _mailer) = context(coach, false);

        for _ in 0..5 {
            let _ = dispatch_contact(&ctx, "198.51.100.7", &coach_id, valid_input()).await;
        }

        // An invalid payload from an exhausted sender must see the rate
        // rejection, not its validation errors
        let err = dispatch_contact(&ctx, "198.51.100.7", &coach_id, RawContactInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_unknown_recipient_is_not_found() {
        let (ctx, mailer) = context(coach(), false);

        let err = dispatch_contact(
            &ctx,
            "203.0.113.9",
            &Uuid::new_v4().to_string(),
            valid_input(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::RecipientNotFound));
        assert_eq!(mailer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sanitized_fields_flow_into_the_outbound_mail() {
        // Mailer that captures the outbound payload
        struct CapturingMailer {
            seen: tokio::sync::Mutex<Vec<OutboundEmail>>,
        }

        #[async_trait]
        impl Mailer for CapturingMailer {
            async fn send(&self, mail: &OutboundEmail) -> Result<()> {
                self.seen.lock().await.push(mail.clone());
                Ok(())
            }
        }

        let coach = coach();
        let coach_id = coach.id.to_string();
        let coach_email = coach.email.clone();
        let mailer = Arc::new(CapturingMailer {
            seen: tokio::sync::Mutex::new(Vec::new()),
        });
        let ctx = AppContext::new(
            Arc::new(test_config()),
            RateLimiter::new(
                Arc::new(MemoryRateStore::new()),
                5,
                Duration::from_secs(3600),
            ),
            Arc::new(FixtureDirectory { coach }),
            mailer.clone(),
        );

        let mut input = valid_input();
        input.sender_name = "Jamie <b>Visitor</b>".to_string();

        dispatch_contact(&ctx, "203.0.113.9", &coach_id, input)
            .await
            .unwrap();

        let seen = mailer.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].to, coach_email);
        assert_eq!(seen[0].reply_to, "visitor@example.com");
        assert_eq!(seen[0].reply_to_name, "Jamie Visitor");
    }
}
