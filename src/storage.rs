use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::Db;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::backfill::Operation;
use crate::models::{Invite, InviteStatus, Membership, OwnerProfile, Ownership, User};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("record serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },
}

impl From<TransactionError<StorageError>> for StorageError {
    fn from(err: TransactionError<StorageError>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(db) => StorageError::Db(db),
        }
    }
}

fn abort(err: StorageError) -> ConflictableTransactionError<StorageError> {
    ConflictableTransactionError::Abort(err)
}

fn abort_serde(err: serde_json::Error) -> ConflictableTransactionError<StorageError> {
    abort(StorageError::Serde(err))
}

/// Flat owner-profile row as stored. The nested ownership, membership, and
/// invite records live in their own trees under `{profile_id}/...` keys and
/// are assembled into an `OwnerProfile` view on read.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct OwnerProfileRecord {
    id: String,
    email: String,
    user_id: Option<String>,
}

/// Sled-backed store for co-ownership records.
///
/// Trees:
/// - `users`: user id -> user record
/// - `owner_profiles`: profile id -> flat profile row
/// - `ownerships`, `memberships`: `{profile_id}/{property_id}` -> record;
///   the composite key is the membership's natural upsert key
/// - `invites`: `{profile_id}/{invite_id}` -> record
pub struct Storage {
    db: Db,
    users: sled::Tree,
    owner_profiles: sled::Tree,
    ownerships: sled::Tree,
    memberships: sled::Tree,
    invites: sled::Tree,
}

fn scoped_key(profile_id: &str, suffix: &str) -> String {
    format!("{profile_id}/{suffix}")
}

impl Storage {
    /// Open or create the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let users = db.open_tree("users")?;
        let owner_profiles = db.open_tree("owner_profiles")?;
        let ownerships = db.open_tree("ownerships")?;
        let memberships = db.open_tree("memberships")?;
        let invites = db.open_tree("invites")?;
        Ok(Self {
            db,
            users,
            owner_profiles,
            ownerships,
            memberships,
            invites,
        })
    }

    /// Flush outstanding writes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn create_user(&self, user: &User) -> Result<(), StorageError> {
        self.users
            .insert(user.id.as_bytes(), serde_json::to_vec(user)?)?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>, StorageError> {
        match self.users.get(id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let mut users = Vec::new();
        for item in self.users.iter() {
            let (_, raw) = item?;
            users.push(serde_json::from_slice(&raw)?);
        }
        Ok(users)
    }

    /// Store a profile row together with its nested records.
    pub fn create_owner_profile(&self, profile: &OwnerProfile) -> Result<(), StorageError> {
        let record = OwnerProfileRecord {
            id: profile.id.clone(),
            email: profile.email.clone(),
            user_id: profile.user_id.clone(),
        };
        self.owner_profiles
            .insert(record.id.as_bytes(), serde_json::to_vec(&record)?)?;
        for ownership in &profile.ownerships {
            self.add_ownership(&profile.id, ownership)?;
        }
        for membership in &profile.memberships {
            self.put_membership(&profile.id, membership)?;
        }
        for invite in &profile.invites {
            self.create_invite(&profile.id, invite)?;
        }
        Ok(())
    }

    pub fn add_ownership(&self, profile_id: &str, ownership: &Ownership) -> Result<(), StorageError> {
        let key = scoped_key(profile_id, &ownership.property_id);
        self.ownerships
            .insert(key.as_bytes(), serde_json::to_vec(ownership)?)?;
        Ok(())
    }

    /// Upsert a membership at its (profile, property) natural key.
    pub fn put_membership(
        &self,
        profile_id: &str,
        membership: &Membership,
    ) -> Result<(), StorageError> {
        let key = scoped_key(profile_id, &membership.property_id);
        self.memberships
            .insert(key.as_bytes(), serde_json::to_vec(membership)?)?;
        Ok(())
    }

    pub fn create_invite(&self, profile_id: &str, invite: &Invite) -> Result<(), StorageError> {
        let key = scoped_key(profile_id, &invite.id);
        self.invites
            .insert(key.as_bytes(), serde_json::to_vec(invite)?)?;
        Ok(())
    }

    /// Assembled profile view with all of its nested records.
    pub fn get_owner_profile(&self, id: &str) -> Result<Option<OwnerProfile>, StorageError> {
        match self.owner_profiles.get(id.as_bytes())? {
            Some(raw) => {
                let record: OwnerProfileRecord = serde_json::from_slice(&raw)?;
                Ok(Some(self.assemble_profile(record, false)?))
            }
            None => Ok(None),
        }
    }

    /// Snapshot for the planner: every user, and every owner profile with its
    /// nested records, invites pre-filtered to pending.
    pub fn load_snapshot(&self) -> Result<(Vec<OwnerProfile>, Vec<User>), StorageError> {
        let mut profiles = Vec::new();
        for item in self.owner_profiles.iter() {
            let (_, raw) = item?;
            let record: OwnerProfileRecord = serde_json::from_slice(&raw)?;
            profiles.push(self.assemble_profile(record, true)?);
        }
        let users = self.list_users()?;
        debug!(
            profiles = profiles.len(),
            users = users.len(),
            "assembled backfill snapshot"
        );
        Ok((profiles, users))
    }

    fn assemble_profile(
        &self,
        record: OwnerProfileRecord,
        pending_invites_only: bool,
    ) -> Result<OwnerProfile, StorageError> {
        let prefix = format!("{}/", record.id);

        let mut ownerships = Vec::new();
        for item in self.ownerships.scan_prefix(prefix.as_bytes()) {
            let (_, raw) = item?;
            ownerships.push(serde_json::from_slice(&raw)?);
        }

        let mut memberships = Vec::new();
        for item in self.memberships.scan_prefix(prefix.as_bytes()) {
            let (_, raw) = item?;
            memberships.push(serde_json::from_slice(&raw)?);
        }

        let mut invites: Vec<Invite> = Vec::new();
        for item in self.invites.scan_prefix(prefix.as_bytes()) {
            let (_, raw) = item?;
            let invite: Invite = serde_json::from_slice(&raw)?;
            if pending_invites_only && invite.status != InviteStatus::Pending {
                continue;
            }
            invites.push(invite);
        }

        Ok(OwnerProfile {
            id: record.id,
            email: record.email,
            user_id: record.user_id,
            ownerships,
            memberships,
            invites,
        })
    }

    /// Apply a planner operation list inside one transaction.
    ///
    /// Operations are applied in the given order; any failure aborts the
    /// whole batch. Conflicts are not re-validated here; callers must refuse
    /// to apply a plan whose conflict list is non-empty.
    pub fn apply_backfill(
        &self,
        operations: &[Operation],
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        (&self.owner_profiles, &self.memberships, &self.invites).transaction(
            |(profiles, memberships, invites)| -> sled::transaction::ConflictableTransactionResult<(), StorageError> {
                for operation in operations {
                    match operation {
                        Operation::LinkOwner {
                            owner_profile_id,
                            user_id,
                        } => {
                            let raw = profiles.get(owner_profile_id.as_bytes())?.ok_or_else(|| {
                                abort(StorageError::NotFound {
                                    kind: "owner profile",
                                    key: owner_profile_id.clone(),
                                })
                            })?;
                            let mut record: OwnerProfileRecord =
                                serde_json::from_slice(&raw).map_err(abort_serde)?;
                            record.user_id = Some(user_id.clone());
                            profiles.insert(
                                owner_profile_id.as_bytes(),
                                serde_json::to_vec(&record).map_err(abort_serde)?,
                            )?;
                        }
                        Operation::CreateMembership {
                            owner_profile_id,
                            property_id,
                            user_id,
                            role,
                        } => {
                            // Insert at the natural key is the native upsert;
                            // re-applying the same operation is a no-op.
                            let key = scoped_key(owner_profile_id, property_id);
                            let record = Membership {
                                property_id: property_id.clone(),
                                user_id: Some(user_id.clone()),
                                role: *role,
                            };
                            memberships.insert(
                                key.as_bytes(),
                                serde_json::to_vec(&record).map_err(abort_serde)?,
                            )?;
                        }
                        Operation::ClaimInvite {
                            invite_id,
                            owner_profile_id,
                            user_id,
                        } => {
                            let key = scoped_key(owner_profile_id, invite_id);
                            let raw = invites.get(key.as_bytes())?.ok_or_else(|| {
                                abort(StorageError::NotFound {
                                    kind: "invite",
                                    key: key.clone(),
                                })
                            })?;
                            let mut invite: Invite =
                                serde_json::from_slice(&raw).map_err(abort_serde)?;
                            invite.status = InviteStatus::Claimed;
                            invite.claimed_at = Some(now);
                            invite.claimed_by_id = Some(user_id.clone());
                            invites.insert(
                                key.as_bytes(),
                                serde_json::to_vec(&invite).map_err(abort_serde)?,
                            )?;
                        }
                    }
                }
                Ok(())
            },
        )?;
        info!(operations = operations.len(), "backfill operations applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::{plan_membership_backfill, BackfillPlan};
    use crate::models::{MembershipRole, OwnershipRole};
    use std::fs;

    fn open_temp(name: &str) -> (Storage, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        let storage = Storage::open(&dir).expect("Failed to open storage");
        (storage, dir)
    }

    fn pending_invite(id: &str, property_id: &str, role: MembershipRole) -> Invite {
        Invite {
            id: id.to_string(),
            property_id: property_id.to_string(),
            role,
            status: InviteStatus::Pending,
            claimed_at: None,
            claimed_by_id: None,
        }
    }

    fn sample_profile() -> OwnerProfile {
        OwnerProfile {
            id: "profile-1".to_string(),
            email: "anna@example.com".to_string(),
            user_id: None,
            ownerships: vec![Ownership {
                property_id: "cabin-1".to_string(),
                role: OwnershipRole::Owner,
            }],
            memberships: vec![],
            invites: vec![pending_invite("inv-1", "cabin-1", MembershipRole::Owner)],
        }
    }

    #[test]
    fn test_profile_round_trip_and_pending_filter() {
        let (storage, dir) = open_temp("cabinshare_test_round_trip");

        let mut profile = sample_profile();
        profile.invites.push(Invite {
            status: InviteStatus::Claimed,
            ..pending_invite("inv-0", "cabin-2", MembershipRole::Manager)
        });
        storage.create_owner_profile(&profile).expect("Create failed");

        let loaded = storage
            .get_owner_profile("profile-1")
            .expect("Get failed")
            .expect("Profile missing");
        assert_eq!(loaded.email, "anna@example.com");
        assert_eq!(loaded.ownerships.len(), 1);
        assert_eq!(loaded.invites.len(), 2);

        // Snapshot view keeps only pending invites.
        let (profiles, _) = storage.load_snapshot().expect("Snapshot failed");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].invites.len(), 1);
        assert_eq!(profiles[0].invites[0].id, "inv-1");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_apply_then_replan_is_empty() {
        let (storage, dir) = open_temp("cabinshare_test_apply_replan");

        storage
            .create_user(&User {
                id: "user-1".to_string(),
                email: "anna@example.com".to_string(),
            })
            .expect("Create user failed");
        storage
            .create_owner_profile(&sample_profile())
            .expect("Create profile failed");

        let (profiles, users) = storage.load_snapshot().expect("Snapshot failed");
        let plan = plan_membership_backfill(&profiles, &users);
        assert_eq!(plan.operations.len(), 3);
        assert!(plan.conflicts.is_empty());

        let now = Utc::now();
        storage.apply_backfill(&plan.operations, now).expect("Apply failed");

        // Profile linked, membership created, invite claimed with stamps.
        let applied = storage
            .get_owner_profile("profile-1")
            .expect("Get failed")
            .expect("Profile missing");
        assert_eq!(applied.user_id.as_deref(), Some("user-1"));
        assert_eq!(applied.memberships.len(), 1);
        assert_eq!(applied.memberships[0].user_id.as_deref(), Some("user-1"));
        assert_eq!(applied.memberships[0].role, MembershipRole::Owner);
        assert_eq!(applied.invites[0].status, InviteStatus::Claimed);
        assert_eq!(applied.invites[0].claimed_at, Some(now));
        assert_eq!(applied.invites[0].claimed_by_id.as_deref(), Some("user-1"));

        // Re-running the planner against the applied state finds nothing.
        let (profiles, users) = storage.load_snapshot().expect("Snapshot failed");
        let replan = plan_membership_backfill(&profiles, &users);
        assert_eq!(replan, BackfillPlan::default());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_reapplying_operations_leaves_identical_state() {
        let (storage, dir) = open_temp("cabinshare_test_reapply");

        storage
            .create_user(&User {
                id: "user-1".to_string(),
                email: "anna@example.com".to_string(),
            })
            .expect("Create user failed");
        storage
            .create_owner_profile(&sample_profile())
            .expect("Create profile failed");

        let (profiles, users) = storage.load_snapshot().expect("Snapshot failed");
        let plan = plan_membership_backfill(&profiles, &users);

        let now = Utc::now();
        storage.apply_backfill(&plan.operations, now).expect("First apply failed");
        let first = storage
            .get_owner_profile("profile-1")
            .expect("Get failed")
            .expect("Profile missing");

        storage.apply_backfill(&plan.operations, now).expect("Second apply failed");
        let second = storage
            .get_owner_profile("profile-1")
            .expect("Get failed")
            .expect("Profile missing");

        assert_eq!(first, second);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_profile_aborts_whole_transaction() {
        let (storage, dir) = open_temp("cabinshare_test_abort");

        let operations = vec![
            Operation::CreateMembership {
                owner_profile_id: "profile-1".to_string(),
                property_id: "cabin-1".to_string(),
                user_id: "user-1".to_string(),
                role: MembershipRole::Owner,
            },
            Operation::LinkOwner {
                owner_profile_id: "profile-missing".to_string(),
                user_id: "user-1".to_string(),
            },
        ];

        let result = storage.apply_backfill(&operations, Utc::now());
        assert!(matches!(
            result,
            Err(StorageError::NotFound { kind: "owner profile", .. })
        ));

        // The membership written before the failing operation rolled back.
        assert_eq!(storage.memberships.len(), 0);

        let _ = fs::remove_dir_all(dir);
    }
}
