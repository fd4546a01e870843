// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flat permission strings carried on identities and access keys.

use infra_server_api::Id;

use crate::error::{AuthError, Result};

pub const ADMIN: &str = "infra.admin";
pub const CONNECTOR: &str = "infra.connector";
pub const USER: &str = "infra.user";

pub const ALL: [&str; 3] = [ADMIN, CONNECTOR, USER];

pub fn is_known(permission: &str) -> bool {
	ALL.contains(&permission)
}

/// `infra.admin` satisfies every check.
pub fn has_permission(granted: &[String], required: &str) -> bool {
	granted.iter().any(|p| p == ADMIN || p == required)
}

/// Who a request is acting as, resolved from its bearer access key.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
	pub identity_id: Id,
	pub identity_name: String,
	pub access_key_id: Id,
	/// Union of the identity's and the key's permissions.
	pub permissions: Vec<String>,
}

impl Principal {
	pub fn new(
		identity_id: Id,
		identity_name: impl Into<String>,
		access_key_id: Id,
		identity_permissions: &[String],
		key_permissions: &[String],
	) -> Self {
		let mut permissions: Vec<String> = identity_permissions
			.iter()
			.chain(key_permissions)
			.cloned()
			.collect();
		permissions.sort();
		permissions.dedup();
		Self {
			identity_id,
			identity_name: identity_name.into(),
			access_key_id,
			permissions,
		}
	}

	pub fn has(&self, permission: &str) -> bool {
		has_permission(&self.permissions, permission)
	}

	pub fn is_admin(&self) -> bool {
		self.has(ADMIN)
	}

	pub fn require(&self, permission: &str) -> Result<()> {
		if self.has(permission) {
			Ok(())
		} else {
			Err(AuthError::PermissionDenied(permission.to_string()))
		}
	}

	/// Passes when any of `permissions` is held.
	pub fn require_any(&self, permissions: &[&str]) -> Result<()> {
		if permissions.iter().any(|p| self.has(p)) {
			Ok(())
		} else {
			Err(AuthError::PermissionDenied(permissions.join(" or ")))
		}
	}

	/// Admins may act on anyone; everyone else only on themselves.
	pub fn require_self_or_admin(&self, identity: Id) -> Result<()> {
		if self.identity_id == identity || self.is_admin() {
			Ok(())
		} else {
			Err(AuthError::PermissionDenied(ADMIN.to_string()))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn principal(perms: &[&str]) -> Principal {
		let perms: Vec<String> = perms.iter().map(|p| p.to_string()).collect();
		Principal::new(Id::generate(), "alice@example.com", Id::generate(), &perms, &[])
	}

	#[test]
	fn admin_satisfies_everything() {
		let admin = principal(&[ADMIN]);
		for p in ALL {
			assert!(admin.has(p));
		}
		admin.require_self_or_admin(Id::generate()).unwrap();
	}

	#[test]
	fn connector_is_not_admin() {
		let connector = principal(&[CONNECTOR]);
		connector.require(CONNECTOR).unwrap();
		assert_eq!(connector.require(ADMIN).unwrap_err().status_code(), 403);
		connector.require_any(&[ADMIN, CONNECTOR]).unwrap();
	}

	#[test]
	fn users_act_only_on_themselves() {
		let user = principal(&[USER]);
		user.require_self_or_admin(user.identity_id).unwrap();
		assert!(user.require_self_or_admin(Id::generate()).is_err());
	}

	#[test]
	fn key_permissions_merge_with_identity() {
		let p = Principal::new(
			Id::generate(),
			"connector",
			Id::generate(),
			&[USER.to_string()],
			&[CONNECTOR.to_string(), USER.to_string()],
		);
		assert_eq!(p.permissions, vec![CONNECTOR.to_string(), USER.to_string()]);
	}

	proptest! {
		#[test]
		fn unknown_permissions_grant_nothing(p in "[a-z.]{1,20}") {
			prop_assume!(!is_known(&p));
			let holder = principal(&[p.as_str()]);
			for known in ALL {
				prop_assert!(!holder.has(known));
			}
		}
	}
}
