//! Group fan-out.
//!
//! Turns one group-addressed envelope into one copy per member. Each copy
//! looks like it came from the group (`from` is the group id) and carries
//! the sender's display profile so clients can render who spoke.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::backend::{GroupMembership, Profile, ProfileLookup};
use crate::envelope::Envelope;

/// Expands group envelopes using the membership and profile collaborators.
#[derive(Clone)]
pub struct GroupExpander {
    groups: Arc<dyn GroupMembership>,
    profiles: Arc<dyn ProfileLookup>,
}

impl GroupExpander {
    pub fn new(groups: Arc<dyn GroupMembership>, profiles: Arc<dyn ProfileLookup>) -> Self {
        Self { groups, profiles }
    }

    /// Build the per-member copies of `envelope`, sender excluded.
    ///
    /// Membership failures yield no copies. A failed profile lookup only
    /// means the copies keep whatever avatar and name the sender supplied.
    #[instrument(skip(self, envelope), fields(group = %envelope.to, from = %envelope.from))]
    pub async fn expand(&self, envelope: &Envelope) -> Vec<Envelope> {
        let members = match self.groups.list_members(&envelope.to).await {
            Ok(members) => members,
            Err(e) => {
                warn!(error = %e, "Failed to list group members");
                return Vec::new();
            }
        };

        let recipients: Vec<String> = members
            .into_iter()
            .filter(|member| member != &envelope.from)
            .collect();

        if recipients.is_empty() {
            debug!("Group has no other members");
            return Vec::new();
        }

        let profile = match self.profiles.get(&envelope.from).await {
            Ok(profile) => profile.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Profile lookup failed, keeping sender-supplied profile");
                Profile::default()
            }
        };

        debug!(recipients = recipients.len(), "Expanding group envelope");

        recipients
            .into_iter()
            .map(|member| member_copy(envelope, member, &profile))
            .collect()
    }
}

fn member_copy(envelope: &Envelope, member: String, profile: &Profile) -> Envelope {
    let avatar = if profile.avatar.is_empty() {
        envelope.avatar.clone()
    } else {
        profile.avatar.clone()
    };
    let from_username = if envelope.from_username.is_empty() {
        profile.display_name.clone()
    } else {
        envelope.from_username.clone()
    };

    Envelope {
        avatar,
        from_username,
        from: envelope.to.clone(),
        to: member,
        content: envelope.content.clone(),
        content_type: envelope.content_type,
        kind: envelope.kind.clone(),
        message_type: envelope.message_type,
        url: envelope.url.clone(),
        ..Default::default()
    }
}
