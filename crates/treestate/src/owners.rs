//! Cached user and group name lookups.
//!
//! Resolving a uid to a name goes through NSS and may hit the network, while
//! a tree usually has very few distinct owners. Both directions are kept in
//! small [`BoundedCache`]s: id to name as plain slots keyed by the id, name
//! to id through the string-keyed hash view.

use std::ffi::{CStr, CString};
use std::io;
use std::mem::MaybeUninit;
use std::ptr;

use crate::cache::BoundedCache;
use crate::config::TrackerConfig;
use crate::error::Result;

/// Largest NSS scratch buffer we are willing to allocate.
const MAX_LOOKUP_BUFFER: usize = 1 << 20;

/// uid/gid to name caches, and the reverse.
#[derive(Debug)]
pub struct OwnerNames {
    users: BoundedCache,
    groups: BoundedCache,
    user_ids: BoundedCache,
    group_ids: BoundedCache,
}

impl Default for OwnerNames {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}

impl OwnerNames {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            users: BoundedCache::new(config.owner_cache_slots),
            groups: BoundedCache::new(config.owner_cache_slots),
            user_ids: BoundedCache::new(config.owner_hash_slots),
            group_ids: BoundedCache::new(config.owner_hash_slots),
        }
    }

    /// Name of user `uid`, or `None` if the system does not know it.
    pub fn user_name(&mut self, uid: u32) -> Result<Option<&[u8]>> {
        cached_name(&mut self.users, uid, user_name_of)
    }

    /// Name of group `gid`, or `None` if the system does not know it.
    pub fn group_name(&mut self, gid: u32) -> Result<Option<&[u8]>> {
        cached_name(&mut self.groups, gid, group_name_of)
    }

    /// uid of the user called `name`.
    pub fn user_id(&mut self, name: &[u8]) -> Result<Option<u32>> {
        cached_id(&mut self.user_ids, name, user_id_of)
    }

    /// gid of the group called `name`.
    pub fn group_id(&mut self, name: &[u8]) -> Result<Option<u32>> {
        cached_id(&mut self.group_ids, name, group_id_of)
    }
}

fn cached_name(
    cache: &mut BoundedCache,
    id: u32,
    lookup: fn(u32) -> io::Result<Option<Vec<u8>>>,
) -> Result<Option<&[u8]>> {
    let key = u64::from(id);
    let slot = match cache.position(key) {
        Some(position) => cache.set_active(position),
        None => {
            let Some(name) = lookup(id)? else {
                return Ok(None);
            };
            cache.add(key, &name)?;
            cache.lru()
        }
    };
    Ok(cache.slot(slot).map(|cached| cached.as_bytes()))
}

fn cached_id(
    cache: &mut BoundedCache,
    name: &[u8],
    lookup: fn(&CStr) -> io::Result<Option<u32>>,
) -> Result<Option<u32>> {
    if let Some(id) = cache.hash_find(name) {
        return Ok(Some(id as u32));
    }
    let Ok(c_name) = CString::new(name) else {
        return Ok(None);
    };
    let Some(id) = lookup(&c_name)? else {
        return Ok(None);
    };
    cache.hash_add(name, u64::from(id))?;
    Ok(Some(id))
}

// ---------------------------------------------------------------------------
// NSS calls
// ---------------------------------------------------------------------------

/// Runs a reentrant NSS lookup, growing the scratch buffer on `ERANGE`.
fn with_lookup_buffer<T>(
    mut call: impl FnMut(&mut [libc::c_char]) -> (libc::c_int, Option<T>),
) -> io::Result<Option<T>> {
    let mut size = 1024;
    loop {
        let mut buffer = vec![0 as libc::c_char; size];
        let (rc, value) = call(&mut buffer);
        match rc {
            0 => return Ok(value),
            libc::ERANGE if size < MAX_LOOKUP_BUFFER => size *= 2,
            libc::ENOENT | libc::ESRCH | libc::EBADF | libc::EPERM => return Ok(None),
            _ => return Err(io::Error::from_raw_os_error(rc)),
        }
    }
}

fn user_name_of(uid: u32) -> io::Result<Option<Vec<u8>>> {
    with_lookup_buffer(|buffer| {
        let mut entry = MaybeUninit::<libc::passwd>::zeroed();
        let mut result: *mut libc::passwd = ptr::null_mut();
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                entry.as_mut_ptr(),
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };
        // SAFETY: on success `result` points at `entry`, whose strings live in
        // `buffer`.
        let name = (rc == 0 && !result.is_null())
            .then(|| unsafe { CStr::from_ptr((*result).pw_name).to_bytes().to_vec() });
        (rc, name)
    })
}

fn group_name_of(gid: u32) -> io::Result<Option<Vec<u8>>> {
    with_lookup_buffer(|buffer| {
        let mut entry = MaybeUninit::<libc::group>::zeroed();
        let mut result: *mut libc::group = ptr::null_mut();
        let rc = unsafe {
            libc::getgrgid_r(
                gid,
                entry.as_mut_ptr(),
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };
        // SAFETY: as in `user_name_of`.
        let name = (rc == 0 && !result.is_null())
            .then(|| unsafe { CStr::from_ptr((*result).gr_name).to_bytes().to_vec() });
        (rc, name)
    })
}

fn user_id_of(name: &CStr) -> io::Result<Option<u32>> {
    with_lookup_buffer(|buffer| {
        let mut entry = MaybeUninit::<libc::passwd>::zeroed();
        let mut result: *mut libc::passwd = ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                name.as_ptr(),
                entry.as_mut_ptr(),
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };
        let uid = (rc == 0 && !result.is_null()).then(|| unsafe { (*result).pw_uid });
        (rc, uid)
    })
}

fn group_id_of(name: &CStr) -> io::Result<Option<u32>> {
    with_lookup_buffer(|buffer| {
        let mut entry = MaybeUninit::<libc::group>::zeroed();
        let mut result: *mut libc::group = ptr::null_mut();
        let rc = unsafe {
            libc::getgrnam_r(
                name.as_ptr(),
                entry.as_mut_ptr(),
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };
        let gid = (rc == 0 && !result.is_null()).then(|| unsafe { (*result).gr_gid });
        (rc, gid)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_user_round_trips() {
        let mut owners = OwnerNames::default();
        let name = owners
            .user_name(0)
            .expect("lookup should succeed")
            .map(<[u8]>::to_vec);
        let Some(name) = name else {
            // Minimal containers may have no passwd database.
            return;
        };
        assert_eq!(owners.user_id(&name).expect("lookup should succeed"), Some(0));
        // Second lookup is served from the cache.
        assert_eq!(owners.user_name(0).unwrap(), Some(&name[..]));
    }

    #[test]
    fn unknown_ids_are_none() {
        let mut owners = OwnerNames::default();
        assert_eq!(owners.user_name(u32::MAX - 7).unwrap(), None);
        assert_eq!(owners.group_id(b"no-such-group-here").unwrap(), None);
        assert_eq!(owners.user_id(b"bad\0name").unwrap(), None);
    }

    #[test]
    fn name_cache_is_bounded() {
        let config = TrackerConfig {
            owner_cache_slots: 2,
            ..TrackerConfig::default()
        };
        let mut owners = OwnerNames::new(&config);
        for gid in 0..5 {
            owners.group_name(gid).unwrap();
        }
        assert!(owners.groups.len() <= 2);
    }
}
