//! Membership backfill planner.
//!
//! Matches owner profiles to identity-provider accounts by email and produces
//! the operation list that links profiles to users, creates the memberships
//! their shares call for, and claims pending invites. Pure computation over
//! the input snapshots: no I/O, no hidden state, identical inputs always
//! produce an identical plan. All writes happen later, in
//! `storage::Storage::apply_backfill`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::models::{InviteStatus, MembershipRole, OwnerProfile, User};

/// A single write proposed by the planner. The applier pattern-matches these
/// exhaustively and performs them in list order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Operation {
    LinkOwner {
        owner_profile_id: String,
        user_id: String,
    },
    CreateMembership {
        owner_profile_id: String,
        property_id: String,
        user_id: String,
        role: MembershipRole,
    },
    ClaimInvite {
        invite_id: String,
        owner_profile_id: String,
        user_id: String,
    },
}

/// A profile the planner refuses to touch: its `user_id` is already set to a
/// different account than the one its email matches. Conflicts are data, not
/// errors; the caller reviews them in dry-run and must not apply while any
/// remain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub owner_profile_id: String,
    pub email: String,
    pub reason: String,
}

/// Combined planner output: the operation list, the conflicts that block
/// profiles, and summary counters for reporting.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillPlan {
    pub operations: Vec<Operation>,
    pub conflicts: Vec<Conflict>,
    pub linked_profiles: usize,
    pub memberships_created: usize,
    pub invites_claimed: usize,
}

/// Compute the backfill plan for a snapshot of owner profiles and users.
///
/// Profiles are processed independently. Per profile, operations come out in
/// a fixed order: link-owner, ownership-derived memberships, membership
/// repairs, then per invite a membership (when needed) followed by its claim,
/// so a membership always exists or already matches before the invite
/// referencing that property is claimed. A conflicted profile contributes no
/// operations at all; a profile whose email matches no user is skipped.
pub fn plan_membership_backfill(owner_profiles: &[OwnerProfile], users: &[User]) -> BackfillPlan {
    // Hash join on normalized email keeps matching O(profiles + users).
    let users_by_email: HashMap<String, &User> = users
        .iter()
        .map(|user| (user.email.to_lowercase(), user))
        .collect();

    let mut plan = BackfillPlan::default();

    for profile in owner_profiles {
        let Some(user) = users_by_email.get(&profile.email.to_lowercase()) else {
            // No account with this email yet. Nothing to do.
            continue;
        };

        if let Some(linked) = &profile.user_id {
            if linked != &user.id {
                plan.conflicts.push(Conflict {
                    owner_profile_id: profile.id.clone(),
                    email: profile.email.clone(),
                    reason: format!(
                        "OwnerProfile.userId ({linked}) does not match User.id ({})",
                        user.id
                    ),
                });
                continue;
            }
        } else {
            plan.operations.push(Operation::LinkOwner {
                owner_profile_id: profile.id.clone(),
                user_id: user.id.clone(),
            });
            plan.linked_profiles += 1;
        }

        // Existing memberships by property, updated as operations are planned
        // so later steps see the post-apply state. Properties touched in this
        // pass never get a second membership operation.
        let mut memberships: HashMap<String, (Option<String>, MembershipRole)> = profile
            .memberships
            .iter()
            .map(|m| (m.property_id.clone(), (m.user_id.clone(), m.role)))
            .collect();
        let mut touched: HashSet<String> = HashSet::new();

        for ownership in &profile.ownerships {
            // An existing membership's role is authoritative; otherwise the
            // role derives from the ownership share.
            let existing = memberships.get(&ownership.property_id);
            let desired = match existing {
                Some((_, role)) => *role,
                None => ownership.role.membership_role(),
            };
            if let Some((member_user, role)) = existing {
                if member_user.as_deref() == Some(user.id.as_str()) && *role == desired {
                    continue;
                }
            }
            plan.operations.push(Operation::CreateMembership {
                owner_profile_id: profile.id.clone(),
                property_id: ownership.property_id.clone(),
                user_id: user.id.clone(),
                role: desired,
            });
            plan.memberships_created += 1;
            touched.insert(ownership.property_id.clone());
            memberships.insert(
                ownership.property_id.clone(),
                (Some(user.id.clone()), desired),
            );
        }

        // Memberships attached to the profile but not yet pointing at the
        // matched user, e.g. manager grants created before signup. The stored
        // role is preserved.
        for membership in &profile.memberships {
            if touched.contains(&membership.property_id) {
                continue;
            }
            if membership.user_id.as_deref() != Some(user.id.as_str()) {
                plan.operations.push(Operation::CreateMembership {
                    owner_profile_id: profile.id.clone(),
                    property_id: membership.property_id.clone(),
                    user_id: user.id.clone(),
                    role: membership.role,
                });
                plan.memberships_created += 1;
                touched.insert(membership.property_id.clone());
                memberships.insert(
                    membership.property_id.clone(),
                    (Some(user.id.clone()), membership.role),
                );
            }
        }

        for invite in &profile.invites {
            // Callers pre-filter to pending invites; re-check anyway.
            if invite.status != InviteStatus::Pending {
                continue;
            }
            if !touched.contains(&invite.property_id) {
                let satisfied = matches!(
                    memberships.get(&invite.property_id),
                    Some((member_user, role))
                        if member_user.as_deref() == Some(user.id.as_str())
                            && *role == invite.role
                );
                if !satisfied {
                    plan.operations.push(Operation::CreateMembership {
                        owner_profile_id: profile.id.clone(),
                        property_id: invite.property_id.clone(),
                        user_id: user.id.clone(),
                        role: invite.role,
                    });
                    plan.memberships_created += 1;
                    touched.insert(invite.property_id.clone());
                    memberships.insert(
                        invite.property_id.clone(),
                        (Some(user.id.clone()), invite.role),
                    );
                }
            }
            plan.operations.push(Operation::ClaimInvite {
                invite_id: invite.id.clone(),
                owner_profile_id: profile.id.clone(),
                user_id: user.id.clone(),
            });
            plan.invites_claimed += 1;
        }
    }

    plan
}

/// One-line human description of an operation, for dry-run output.
pub fn describe_operation(operation: &Operation) -> String {
    match operation {
        Operation::LinkOwner {
            owner_profile_id,
            user_id,
        } => format!("Link owner profile {owner_profile_id} to user {user_id}"),
        Operation::CreateMembership {
            owner_profile_id,
            property_id,
            user_id,
            role,
        } => format!(
            "Create {role} membership on property {property_id} for user {user_id} (profile {owner_profile_id})"
        ),
        Operation::ClaimInvite {
            invite_id,
            owner_profile_id,
            user_id,
        } => format!("Claim invite {invite_id} for user {user_id} (profile {owner_profile_id})"),
    }
}
