// ============================================================================
// Recipient Directory & Resolver
// ============================================================================
//
// The directory is an external collaborator: the organization's member
// store. The relay only ever asks it one question (who is this id?) through
// the RecipientDirectory trait, so tests and future backends can swap the
// implementation without touching the pipeline.
//
// The resolver owns the authorization invariant: "no such id" and "exists
// but is not a contactable coach" are folded into one indistinguishable
// NotFound, so the public endpoint cannot be used to enumerate member
// roles. That fold lives here and nowhere else.
//
// ============================================================================

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

/// Directory role of a member record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientRole {
    Coach,
    Staff,
    Member,
}

impl RecipientRole {
    /// Map the directory's role column onto the relay's view of it.
    /// Unknown values are treated as plain members, i.e. not contactable.
    pub fn from_directory(value: &str) -> Self {
        match value {
            "coach" | "trainer" => Self::Coach,
            "staff" | "admin" => Self::Staff,
            _ => Self::Member,
        }
    }

    /// Only coaches can be messaged through the relay
    pub fn is_contactable(self) -> bool {
        matches!(self, Self::Coach)
    }
}

/// A member record as the relay sees it. `email` is the one piece of data
/// the whole service exists to protect: it is used for delivery and must
/// never be serialized into a response or logged in plaintext.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub role: RecipientRole,
}

/// External member-store collaborator
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn find_recipient_by_id(&self, id: Uuid) -> Result<Option<Recipient>>;

    /// Liveness probe for the health endpoint
    async fn ping(&self) -> Result<()>;
}

// ============================================================================
// Postgres Directory
// ============================================================================

#[derive(sqlx::FromRow)]
struct RecipientRow {
    id: Uuid,
    display_name: String,
    email: Option<String>,
    role: String,
}

impl From<RecipientRow> for Recipient {
    fn from(row: RecipientRow) -> Self {
        Self {
            id: row.id,
            display_name: row.display_name,
            email: row.email.unwrap_or_default(),
            role: RecipientRole::from_directory(&row.role),
        }
    }
}

/// Directory backed by the organization's Postgres member store
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to directory database: {}", e))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PgDirectory {
    async fn find_recipient_by_id(&self, id: Uuid) -> Result<Option<Recipient>> {
        let row = sqlx::query_as::<_, RecipientRow>(
            "SELECT id, display_name, email, role FROM members WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Recipient::from))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolution failure, pre-folded for the response contract
#[derive(Debug)]
pub enum ResolveError {
    /// Id unknown, or known but not a contactable coach - deliberately the
    /// same variant for both
    NotFound,
    /// Eligible recipient with no deliverable address: an operator problem,
    /// not a client one
    Misconfigured(String),
    /// Directory I/O failure
    Directory(anyhow::Error),
}

/// Enforces who may be contacted through the relay
#[derive(Clone)]
pub struct RecipientResolver {
    directory: Arc<dyn RecipientDirectory>,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn RecipientDirectory>) -> Self {
        Self { directory }
    }

    pub async fn resolve(&self, id: Uuid) -> Result<Recipient, ResolveError> {
        let found = self
            .directory
            .find_recipient_by_id(id)
            .await
            .map_err(ResolveError::Directory)?;

        match found {
            None => Err(ResolveError::NotFound),
            Some(recipient) if !recipient.role.is_contactable() => Err(ResolveError::NotFound),
            Some(recipient) if recipient.email.trim().is_empty() => Err(
                ResolveError::Misconfigured(format!("coach {} has no address on file", recipient.id)),
            ),
            Some(recipient) => Ok(recipient),
        }
    }
}
