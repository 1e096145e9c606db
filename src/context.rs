use crate::config::Config;
use crate::directory::{RecipientDirectory, RecipientResolver};
use crate::mailer::Mailer;
use crate::rate_limit::RateLimiter;
use std::sync::Arc;

/// Application context containing shared dependencies
/// This reduces parameter passing and makes it easier to add new dependencies
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub rate_limiter: RateLimiter,
    pub resolver: RecipientResolver,
    pub mailer: Arc<dyn Mailer>,
    pub directory: Arc<dyn RecipientDirectory>,
}

impl AppContext {
    /// Creates a new application context
    pub fn new(
        config: Arc<Config>,
        rate_limiter: RateLimiter,
        directory: Arc<dyn RecipientDirectory>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            rate_limiter,
            resolver: RecipientResolver::new(directory.clone()),
            mailer,
            directory,
        }
    }
}
