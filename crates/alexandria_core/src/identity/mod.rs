//! External identity reconciliation
//!
//! Pure diff-and-update logic for syncing an external login provider's profile
//! payload into local user records. Comparison lives here, persistence lives in
//! [`crate::database::queries`], so the merge policy is testable without a
//! database.
//!
//! The policy: a stored field is overwritten only when the incoming value is
//! non-empty AND differs from what is stored. Empty incoming fields never blank
//! out local data, which protects against partial profile syncs from the
//! provider.

use crate::database::types::{IdentityProfileRecord, UserRecord};
use serde::{Deserialize, Serialize};

/// Profile payload as delivered by the external identity provider.
#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone)]
pub struct IdentityPayload {
    pub external_id: String,
    pub display_name: String,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    pub picture: String,
}

impl IdentityPayload {
    #[must_use]
    #[inline]
    pub const fn new(
        external_id: String,
        display_name: String,
        email: String,
        given_name: String,
        family_name: String,
        picture: String,
    ) -> Self {
        Self {
            external_id,
            display_name,
            email,
            given_name,
            family_name,
            picture,
        }
    }
}

/// The subset of user fields a reconcile pass decided to change. `None` means
/// "leave the stored value alone".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFieldChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserFieldChanges {
    /// True when the reconcile pass found nothing to update, meaning no write
    /// should happen at all.
    #[must_use]
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
    }
}

fn diff_field(stored: &str, incoming: &str) -> Option<String> {
    if incoming.is_empty() || incoming == stored {
        None
    } else {
        Some(incoming.to_owned())
    }
}

/// Compare a stored user against an incoming payload and return only the
/// fields that should be overwritten. The provider's display name maps onto
/// the local username.
#[must_use]
#[inline]
pub fn merge_user_fields(user: &UserRecord, payload: &IdentityPayload) -> UserFieldChanges {
    UserFieldChanges {
        username: diff_field(&user.username, &payload.display_name),
        email: diff_field(&user.email, &payload.email),
        first_name: diff_field(&user.first_name, &payload.given_name),
        last_name: diff_field(&user.last_name, &payload.family_name),
    }
}

/// Same diff policy applied solely to the profile picture URI.
#[must_use]
#[inline]
pub fn merge_picture(profile: &IdentityProfileRecord, payload: &IdentityPayload) -> Option<String> {
    diff_field(&profile.picture, &payload.picture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stored_user() -> UserRecord {
        let now = chrono::NaiveDate::from_ymd_opt(2024, 2, 10)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        UserRecord::new(
            1,
            String::from("old"),
            String::from("old@x.com"),
            String::from("Old"),
            String::from("Name"),
            now,
            now,
        )
    }

    fn payload() -> IdentityPayload {
        IdentityPayload::new(
            String::from("x1"),
            String::from(""),
            String::from("a@b.com"),
            String::from("Amir"),
            String::from(""),
            String::from(""),
        )
    }

    #[test]
    fn empty_incoming_fields_never_overwrite() {
        let changes = merge_user_fields(&stored_user(), &payload());

        assert_eq!(changes.username, None);
        assert_eq!(changes.last_name, None);
    }

    #[test]
    fn differing_non_empty_fields_are_overwritten() {
        let changes = merge_user_fields(&stored_user(), &payload());

        assert_eq!(changes.email, Some(String::from("a@b.com")));
        assert_eq!(changes.first_name, Some(String::from("Amir")));
    }

    #[test]
    fn identical_payload_produces_no_changes() {
        let user = stored_user();
        let incoming = IdentityPayload::new(
            String::from("x1"),
            user.username.clone(),
            user.email.clone(),
            user.first_name.clone(),
            user.last_name.clone(),
            String::from(""),
        );

        let changes = merge_user_fields(&user, &incoming);
        assert_eq!(changes, UserFieldChanges::default());
        assert!(changes.is_empty());
    }

    #[test]
    fn picture_follows_the_same_policy() {
        let profile = IdentityProfileRecord::new(
            1,
            String::from("x1"),
            1,
            String::from("https://img.example/a.png"),
        );

        let mut incoming = payload();
        assert_eq!(merge_picture(&profile, &incoming), None);

        incoming.picture = String::from("https://img.example/a.png");
        assert_eq!(merge_picture(&profile, &incoming), None);

        incoming.picture = String::from("https://img.example/b.png");
        assert_eq!(
            merge_picture(&profile, &incoming),
            Some(String::from("https://img.example/b.png"))
        );
    }
}
