//! Recipient descriptors and their expansion into concrete users.
//!
//! Caller-supplied tokens are parsed into [`RecipientDescriptor`] once at
//! the surface boundary; the resolver and engine operate on the closed
//! enum and never re-parse strings.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directory::{Directory, Role};

use super::MessagingError;

/// Named group addressable in a compose call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupToken {
    /// Every user in the platform.
    Everyone,
    /// All users holding the staff role.
    Staff,
    /// All users holding the mentor role.
    Mentors,
    /// All users holding the mentee role.
    Mentees,
    /// All users holding the guardian role.
    Guardians,
    /// All mentees on the team with this id.
    Team(i64),
}

impl GroupToken {
    /// The wire token form, e.g. `group:mentees` or `group:team:42`.
    pub fn token(&self) -> String {
        match self {
            Self::Everyone => "group:everyone".to_owned(),
            Self::Staff => "group:staff".to_owned(),
            Self::Mentors => "group:mentors".to_owned(),
            Self::Mentees => "group:mentees".to_owned(),
            Self::Guardians => "group:guardians".to_owned(),
            Self::Team(id) => format!("group:team:{id}"),
        }
    }
}

/// One addressee token of a compose call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecipientDescriptor {
    /// A raw user id.
    User(i64),
    /// The `support` pseudo-group: routes to the live support inbox set.
    Support,
    /// A named group, honored only for staff-tier senders.
    Group(GroupToken),
}

impl RecipientDescriptor {
    /// Parse a single wire token.
    ///
    /// Returns `None` for unrecognised tokens; the caller drops them
    /// silently, matching the resolver's unknown-id policy.
    pub fn parse(token: &str) -> Option<Self> {
        if token == "support" {
            return Some(Self::Support);
        }
        if let Some(group) = token.strip_prefix("group:") {
            if let Some(team) = group.strip_prefix("team:") {
                return team.parse().ok().map(|id| Self::Group(GroupToken::Team(id)));
            }
            let token = match group {
                "everyone" => GroupToken::Everyone,
                "staff" => GroupToken::Staff,
                "mentors" => GroupToken::Mentors,
                "mentees" => GroupToken::Mentees,
                "guardians" => GroupToken::Guardians,
                _ => return None,
            };
            return Some(Self::Group(token));
        }
        token.parse().ok().map(Self::User)
    }
}

/// Parse a list of wire tokens, silently dropping unrecognised ones.
pub fn parse_descriptors(tokens: &[String]) -> Vec<RecipientDescriptor> {
    tokens
        .iter()
        .filter_map(|t| {
            let parsed = RecipientDescriptor::parse(t);
            if parsed.is_none() {
                debug!(token = %t, "dropping unrecognised recipient token");
            }
            parsed
        })
        .collect()
}

/// Expand descriptors into a deduplicated set of concrete user ids.
///
/// Group tokens are honored only when `sender_may_broadcast` (the
/// staff-tier `send group_message` permission); otherwise they contribute
/// zero recipients by design, not as an error. Group expansions always
/// exclude the sender. A raw [`RecipientDescriptor::User`] equal to the
/// sender is NOT filtered — only group expansions subtract the sender
/// (source behavior kept verbatim; see DESIGN.md). Unknown user ids are
/// silently dropped. [`RecipientDescriptor::Support`] contributes zero
/// recipients here; the engine routes it separately.
///
/// # Errors
///
/// Returns [`MessagingError::Directory`] if a lookup fails.
pub async fn resolve(
    directory: &dyn Directory,
    sender: i64,
    descriptors: &[RecipientDescriptor],
    sender_may_broadcast: bool,
) -> Result<Vec<i64>, MessagingError> {
    let mut seen: HashSet<i64> = HashSet::new();
    let mut recipients: Vec<i64> = Vec::new();

    for descriptor in descriptors {
        match descriptor {
            RecipientDescriptor::User(id) => {
                if directory.user_exists(*id).await? {
                    if seen.insert(*id) {
                        recipients.push(*id);
                    }
                } else {
                    debug!(user_id = id, "dropping unknown recipient id");
                }
            }
            RecipientDescriptor::Support => {
                // Routed by the engine via a live permission query.
            }
            RecipientDescriptor::Group(group) => {
                if !sender_may_broadcast {
                    debug!(group = %group.token(), sender, "dropping group token for non-privileged sender");
                    continue;
                }
                for id in expand_group(directory, *group).await? {
                    if id != sender && seen.insert(id) {
                        recipients.push(id);
                    }
                }
            }
        }
    }
    Ok(recipients)
}

/// Expand a single group token into member user ids (sender not yet
/// excluded).
async fn expand_group(
    directory: &dyn Directory,
    group: GroupToken,
) -> Result<Vec<i64>, MessagingError> {
    let members = match group {
        GroupToken::Everyone => directory.all_users().await?,
        GroupToken::Staff => directory.users_with_role(Role::Staff).await?,
        GroupToken::Mentors => directory.users_with_role(Role::Mentor).await?,
        GroupToken::Mentees => directory.users_with_role(Role::Mentee).await?,
        GroupToken::Guardians => directory.users_with_role(Role::Guardian).await?,
        GroupToken::Team(team_id) => directory.team_mentees(team_id).await?,
    };
    Ok(members)
}

/// Guardians to carbon-copy for a message with the given recipients.
///
/// For every recipient holding a mentee profile, linked guardians that are
/// not already recipients of the message and are not the sender form the
/// CC set. Computed per created message, so fan-out messages each get
/// their own CC set scoped to their single recipient.
///
/// # Errors
///
/// Returns [`MessagingError::Directory`] if a lookup fails.
pub async fn guardian_cc(
    directory: &dyn Directory,
    sender: i64,
    recipients: &[i64],
) -> Result<Vec<i64>, MessagingError> {
    let existing: HashSet<i64> = recipients.iter().copied().collect();
    let mut seen: HashSet<i64> = HashSet::new();
    let mut ccs: Vec<i64> = Vec::new();
    for &recipient in recipients {
        if !directory.has_role(recipient, Role::Mentee).await? {
            continue;
        }
        for guardian in directory.guardians_of(recipient).await? {
            if guardian == sender || existing.contains(&guardian) {
                continue;
            }
            if seen.insert(guardian) {
                ccs.push(guardian);
            }
        }
    }
    Ok(ccs)
}
