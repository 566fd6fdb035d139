//! Who is acting: the anonymous identity handed out by the identity provider.

use serde::{Deserialize, Serialize};

use crate::ids::ParticipantId;

/// An anonymous, stable-per-session identity.
///
/// The core treats `participant_id` as pre-authenticated and never validates
/// it. `display_name` is what peers see in the roster and chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub participant_id: ParticipantId,
    pub display_name: String,
}

impl Identity {
    /// Identity with a display name derived from the id.
    pub fn anonymous(participant_id: ParticipantId) -> Self {
        let display_name = Self::derived_name(&participant_id);
        Self {
            participant_id,
            display_name,
        }
    }

    /// Replace the display name. Blank names keep the current one.
    pub fn with_display_name(mut self, name: &str) -> Self {
        let name = name.trim();
        if !name.is_empty() {
            self.display_name = name.to_string();
        }
        self
    }

    /// `Guest-XXXX` from the first characters of the id.
    pub fn derived_name(id: &ParticipantId) -> String {
        format!("Guest-{}", id.short().to_ascii_uppercase())
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.participant_id.short())
    }
}
