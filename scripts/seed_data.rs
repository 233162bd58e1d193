//! Seed script for a local cabinshare store.
//!
//! Populates users, owner profiles, ownership shares, and a pending invite so
//! the backfill script has something to reconcile, then prints a dry-run
//! preview of the resulting plan.
//! Run: cargo run --bin seed_data

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cabinshare::backfill::plan_membership_backfill;
use cabinshare::models::{
    Invite, InviteStatus, Membership, MembershipRole, OwnerProfile, Ownership, OwnershipRole, User,
};
use cabinshare::storage::Storage;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_path =
        std::env::var("CABINSHARE_DB_PATH").unwrap_or_else(|_| "cabinshare_data".to_string());
    let storage = Storage::open(&db_path).with_context(|| format!("opening store at {db_path}"))?;

    // Two signed-up accounts. Cleo owns a share but has not signed up yet.
    let users = [
        User {
            id: "user-astrid".to_string(),
            email: "astrid@example.com".to_string(),
        },
        User {
            id: "user-bjorn".to_string(),
            // Case differs from the profile email; matching is by lowercase.
            email: "Bjorn@Example.com".to_string(),
        },
    ];
    for user in &users {
        storage.create_user(user)?;
    }

    let profiles = [
        // Unlinked owner with a share on the lakeside cabin and a pending
        // invite to the birch cabin.
        OwnerProfile {
            id: "owner-astrid".to_string(),
            email: "astrid@example.com".to_string(),
            user_id: None,
            ownerships: vec![Ownership {
                property_id: "cabin-lakeside".to_string(),
                role: OwnershipRole::Owner,
            }],
            memberships: vec![],
            invites: vec![Invite {
                id: Uuid::new_v4().to_string(),
                property_id: "cabin-birch".to_string(),
                role: MembershipRole::Owner,
                status: InviteStatus::Pending,
                claimed_at: None,
                claimed_by_id: None,
            }],
        },
        // Co-owner on the lakeside cabin, caretaker on the birch cabin, with
        // a manager grant that predates the account link.
        OwnerProfile {
            id: "owner-bjorn".to_string(),
            email: "bjorn@example.com".to_string(),
            user_id: None,
            ownerships: vec![
                Ownership {
                    property_id: "cabin-lakeside".to_string(),
                    role: OwnershipRole::CoOwner,
                },
                Ownership {
                    property_id: "cabin-birch".to_string(),
                    role: OwnershipRole::Caretaker,
                },
            ],
            memberships: vec![Membership {
                property_id: "cabin-birch".to_string(),
                user_id: None,
                role: MembershipRole::Manager,
            }],
            invites: vec![],
        },
        // No matching account yet; the planner skips this profile.
        OwnerProfile {
            id: "owner-cleo".to_string(),
            email: "cleo@example.com".to_string(),
            user_id: None,
            ownerships: vec![Ownership {
                property_id: "cabin-lakeside".to_string(),
                role: OwnershipRole::CoOwner,
            }],
            memberships: vec![],
            invites: vec![],
        },
    ];
    for profile in &profiles {
        storage.create_owner_profile(profile)?;
    }
    storage.flush()?;

    println!(
        "Seeded {} users and {} owner profiles into {db_path}",
        users.len(),
        profiles.len()
    );

    // Dry-run preview of what the backfill would do against this data.
    let (owner_profiles, all_users) = storage.load_snapshot()?;
    let plan = plan_membership_backfill(&owner_profiles, &all_users);
    println!(
        "Backfill preview: {} operations, {} conflicts ({} profiles to link)",
        plan.operations.len(),
        plan.conflicts.len(),
        plan.linked_profiles
    );

    Ok(())
}
