use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity-provider account. `email` is the case-insensitive match key
/// against owner profiles.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
}

/// A human owner, independent of authentication. Carries its nested
/// ownership, membership, and invite records as the planner sees them.
/// `user_id` is set once the profile is claimed by a signed-up account.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OwnerProfile {
    pub id: String,
    pub email: String,
    pub user_id: Option<String>,
    pub ownerships: Vec<Ownership>,
    pub memberships: Vec<Membership>,
    pub invites: Vec<Invite>,
}

/// A share of one property held by an owner profile.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Ownership {
    pub property_id: String,
    pub role: OwnershipRole,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnershipRole {
    Owner,
    CoOwner,
    Caretaker,
}

impl OwnershipRole {
    /// Authorization role granted when no membership exists for the property
    /// yet. Caretakers get manager access; every other share is owner-level.
    pub fn membership_role(self) -> MembershipRole {
        match self {
            OwnershipRole::Caretaker => MembershipRole::Manager,
            OwnershipRole::Owner | OwnershipRole::CoOwner => MembershipRole::Owner,
        }
    }
}

/// Authorization role a membership grants on its property.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MembershipRole {
    Owner,
    Manager,
}

impl fmt::Display for MembershipRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipRole::Owner => write!(f, "OWNER"),
            MembershipRole::Manager => write!(f, "MANAGER"),
        }
    }
}

/// Access-control link between a user and a property, attached to an owner
/// profile. `user_id` may lag behind the profile link until backfilled.
/// Unique per (owner profile, property).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Membership {
    pub property_id: String,
    pub user_id: Option<String>,
    pub role: MembershipRole,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum InviteStatus {
    Pending,
    Claimed,
}

/// Pending grant of access to a property. Moves from `Pending` to `Claimed`
/// exactly once; the claim stamps `claimed_at` and `claimed_by_id`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Invite {
    pub id: String,
    pub property_id: String,
    pub role: MembershipRole,
    pub status: InviteStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by_id: Option<String>,
}
