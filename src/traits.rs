//! Seams between the orchestrator and its outbound collaborators.
//!
//! The pipeline in [`crate::ingest`] only talks to the portal and to the
//! mail relay through these traits. The production implementations are
//! [`PortalClient`](crate::portal::PortalClient) and
//! [`SmtpMailer`](crate::mail::SmtpMailer); tests drive the pipeline with
//! in-memory fakes.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │MessageSource │──▶│   ingest     │──▶│    Mailer    │
//! │ (portal)     │   │ run_pipeline │   │   (SMTP)     │
//! └──────────────┘   └──────┬───────┘   └──────────────┘
//!                           ▼
//!                    ┌──────────────┐
//!                    │ MessageStore │
//!                    └──────────────┘
//! ```
//!
//! The storage seam, [`MessageStore`](crate::store::MessageStore), lives
//! next to its backends in [`crate::store`].

use async_trait::async_trait;

use crate::error::{AuthError, FetchError, NotifyError};
use crate::models::RawMessage;
use crate::notify::OutgoingEmail;

/// Where raw messages come from.
///
/// [`authenticate`](MessageSource::authenticate) must succeed before
/// [`fetch_messages`](MessageSource::fetch_messages) can be called, which
/// the `Session` type enforces.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use homecase_digest::error::{AuthError, FetchError};
/// use homecase_digest::models::RawMessage;
/// use homecase_digest::traits::MessageSource;
///
/// struct Fixed(Vec<RawMessage>);
///
/// #[async_trait]
/// impl MessageSource for Fixed {
///     type Session = ();
///
///     async fn authenticate(&mut self) -> Result<(), AuthError> {
///         Ok(())
///     }
///
///     async fn fetch_messages(&mut self, _: &()) -> Result<Vec<RawMessage>, FetchError> {
///         Ok(self.0.clone())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageSource: Send {
    /// Proof of a successful login, handed back into `fetch_messages`.
    type Session: Send + Sync;

    async fn authenticate(&mut self) -> Result<Self::Session, AuthError>;

    /// Return every available consumption message, newest first.
    async fn fetch_messages(
        &mut self,
        session: &Self::Session,
    ) -> Result<Vec<RawMessage>, FetchError>;
}

/// Mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), NotifyError>;
}
