use moka::sync::Cache;
use nix::unistd::{getgrouplist, Gid, Group, Uid, User};
use std::ffi::CString;
use std::time::Duration;
use tracing::{debug, warn};

use heronfs_common::types::Identity;

use crate::error::LookupError;

/// How long memoized lookups stay fresh. Membership changes on the
/// local host are rare enough that a short TTL is invisible to callers.
const LOOKUP_TTL: Duration = Duration::from_secs(30);
const LOOKUP_CAPACITY: u64 = 4096;

/// Maps the numeric credentials the kernel attaches to each request to
/// the canonical identity the nameserver's permission model expects,
/// and back again for attribute rendering.
///
/// Resolution is a pure function of its inputs; the memoization is an
/// optimization over the platform's account database, not a semantic
/// layer.
pub struct IdentityResolver {
    by_uid: Cache<u32, Identity>,
    uid_by_name: Cache<String, u32>,
    gid_by_name: Cache<String, u32>,

    /// Fallbacks when a remote owner/group name has no local account:
    /// the mounting user's uid/gid.
    default_uid: u32,
    default_gid: u32,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::with_defaults(Uid::current().as_raw(), Gid::current().as_raw())
    }

    pub fn with_defaults(default_uid: u32, default_gid: u32) -> Self {
        Self {
            by_uid: Cache::builder()
                .max_capacity(LOOKUP_CAPACITY)
                .time_to_live(LOOKUP_TTL)
                .build(),
            uid_by_name: Cache::builder()
                .max_capacity(LOOKUP_CAPACITY)
                .time_to_live(LOOKUP_TTL)
                .build(),
            gid_by_name: Cache::builder()
                .max_capacity(LOOKUP_CAPACITY)
                .time_to_live(LOOKUP_TTL)
                .build(),
            default_uid,
            default_gid,
        }
    }

    /// Resolve the caller's numeric credentials to a canonical identity.
    ///
    /// Fails with [`LookupError::UnknownUser`] when the uid has no
    /// account; an unresolvable gid degrades to its numeric string
    /// rather than failing the whole call.
    pub fn resolve(&self, uid: u32, gid: u32) -> Result<Identity, LookupError> {
        if let Some(identity) = self.by_uid.get(&uid) {
            return Ok(identity);
        }

        let user = User::from_uid(Uid::from_raw(uid))
            .map_err(|e| LookupError::Unavailable(e.to_string()))?
            .ok_or(LookupError::UnknownUser(uid))?;

        let primary_group = match Group::from_gid(Gid::from_raw(gid)) {
            Ok(Some(group)) => group.name,
            _ => gid.to_string(),
        };

        let groups = self.supplementary_groups(&user.name, gid);
        debug!(
            "resolved uid {} to {} ({} groups)",
            uid,
            user.name,
            groups.len()
        );

        let identity = Identity::new(user.name, primary_group, groups);
        self.by_uid.insert(uid, identity.clone());
        Ok(identity)
    }

    /// All group names for a user, primary first. Gids with no local
    /// group entry are skipped.
    fn supplementary_groups(&self, username: &str, gid: u32) -> Vec<String> {
        let cname = match CString::new(username) {
            Ok(cname) => cname,
            Err(_) => return Vec::new(),
        };
        let gids = match getgrouplist(&cname, Gid::from_raw(gid)) {
            Ok(gids) => gids,
            Err(e) => {
                warn!("getgrouplist failed for {}: {}", username, e);
                return Vec::new();
            }
        };

        let mut names = Vec::with_capacity(gids.len());
        for g in gids {
            if let Ok(Some(group)) = Group::from_gid(g) {
                if !names.contains(&group.name) {
                    names.push(group.name);
                }
            }
        }
        names
    }

    /// Local uid for a remote owner name; the mounting user's uid when
    /// the name is unknown here.
    pub fn uid_for(&self, name: &str) -> u32 {
        if let Some(uid) = self.uid_by_name.get(name) {
            return uid;
        }
        let uid = match User::from_name(name) {
            Ok(Some(user)) => user.uid.as_raw(),
            _ => self.default_uid,
        };
        self.uid_by_name.insert(name.to_string(), uid);
        uid
    }

    /// Account name for a numeric uid, for rendering chown targets
    pub fn name_of_uid(&self, uid: u32) -> Option<String> {
        match User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(user)) => Some(user.name),
            _ => None,
        }
    }

    /// Group name for a numeric gid
    pub fn name_of_gid(&self, gid: u32) -> Option<String> {
        match Group::from_gid(Gid::from_raw(gid)) {
            Ok(Some(group)) => Some(group.name),
            _ => None,
        }
    }

    /// Local gid for a remote group name; the mounting user's gid when
    /// the name is unknown here.
    pub fn gid_for(&self, name: &str) -> u32 {
        if let Some(gid) = self.gid_by_name.get(name) {
            return gid;
        }
        let gid = match Group::from_name(name) {
            Ok(Some(group)) => group.gid.as_raw(),
            _ => self.default_gid,
        };
        self.gid_by_name.insert(name.to_string(), gid);
        gid
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_current_user() {
        let resolver = IdentityResolver::new();
        let uid = Uid::current().as_raw();
        let gid = Gid::current().as_raw();

        let identity = resolver.resolve(uid, gid).unwrap();
        assert!(!identity.username.is_empty());
        assert!(!identity.primary_group.is_empty());

        // Memoized second call returns the same identity
        let again = resolver.resolve(uid, gid).unwrap();
        assert_eq!(identity, again);
    }

    #[test]
    fn test_resolve_unknown_uid() {
        let resolver = IdentityResolver::new();
        // Far above any allocated uid range, and not the overflow uid
        let err = resolver.resolve(0xfffe_1234, 0xfffe_1234).unwrap_err();
        match err {
            LookupError::UnknownUser(uid) => assert_eq!(uid, 0xfffe_1234),
            other => panic!("expected UnknownUser, got {other:?}"),
        }
    }

    #[test]
    fn test_reverse_lookup_falls_back_to_defaults() {
        let resolver = IdentityResolver::with_defaults(1234, 5678);
        assert_eq!(resolver.uid_for("no-such-user-on-this-host"), 1234);
        assert_eq!(resolver.gid_for("no-such-group-on-this-host"), 5678);
    }

    #[test]
    fn test_reverse_lookup_known_names() {
        let resolver = IdentityResolver::new();
        let uid = Uid::current().as_raw();
        let gid = Gid::current().as_raw();
        let identity = resolver.resolve(uid, gid).unwrap();

        assert_eq!(resolver.uid_for(&identity.username), uid);
        if identity.primary_group != gid.to_string() {
            assert_eq!(resolver.gid_for(&identity.primary_group), gid);
        }
    }
}
