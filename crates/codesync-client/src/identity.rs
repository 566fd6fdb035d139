//! Where the local participant's identity comes from.

use async_trait::async_trait;
use codesync_types::{Identity, ParticipantId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Hands out the identity a session acts as.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn identity(&self) -> Result<Identity, IdentityError>;
}

/// A random anonymous identity, fixed for the lifetime of the provider.
#[derive(Debug, Clone)]
pub struct AnonymousIdentity {
    identity: Identity,
}

impl AnonymousIdentity {
    pub fn new() -> Self {
        let id = ParticipantId::new(uuid::Uuid::new_v4().simple().to_string());
        Self {
            identity: Identity::anonymous(id),
        }
    }

    /// Override the derived `Guest-XXXX` name. Blank names are ignored.
    pub fn with_display_name(mut self, name: &str) -> Self {
        self.identity = self.identity.with_display_name(name);
        self
    }
}

impl Default for AnonymousIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for AnonymousIdentity {
    async fn identity(&self) -> Result<Identity, IdentityError> {
        Ok(self.identity.clone())
    }
}
