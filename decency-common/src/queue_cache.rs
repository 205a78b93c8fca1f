/**
 * Decency anti-spam content filter
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
**/
use anyhow::Context;

/// entries not rewritten for this long expire passively.
pub const DEFAULT_TTL: std::time::Duration = std::time::Duration::from_secs(600);

/// scoring state shared between the policy server, the content filter and
/// the log parser, keyed by the MTA queue-id.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct CacheEntry {
    /// the MTA queue identifier this entry belongs to.
    pub queue_id: String,
    /// predecessor queue-id when the MTA rewrote the message.
    pub prev_id: Option<String>,
    /// successor queue-id learned at re-injection.
    pub next_id: Option<String>,
    /// envelope sender as first seen by the policy server.
    pub orig_from: Option<String>,
    /// the message travels with a null reverse-path.
    pub is_bounce: bool,
    /// accumulated score at the time of the snapshot.
    pub score: i64,
    /// per-module contribution strings.
    pub details: Vec<String>,
    /// session flags.
    pub flags: Vec<String>,
    /// envelope sender.
    pub from: Option<String>,
    /// envelope recipients.
    pub to: Vec<String>,
}

#[derive(serde::Deserialize, serde::Serialize)]
struct Wrapped<T> {
    expires: u64,
    payload: T,
}

/// File-backed key/value store shared by every decency worker on the host.
///
/// One file per key; a write is a total replacement performed as
/// write-to-temp + rename, which is atomic at the key granularity on a
/// POSIX filesystem. There is no read-modify-write protocol.
#[derive(Debug, Clone)]
pub struct QueueCache {
    dirpath: std::path::PathBuf,
    ttl: std::time::Duration,
}

impl QueueCache {
    /// open (and create if needed) the cache directory.
    ///
    /// # Errors
    ///
    /// * the directory cannot be created
    pub fn new(
        dirpath: impl Into<std::path::PathBuf>,
        ttl: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let dirpath = dirpath.into();
        std::fs::DirBuilder::new()
            .recursive(true)
            .create(&dirpath)
            .with_context(|| format!("cannot create cache directory {}", dirpath.display()))?;
        Ok(Self { dirpath, ttl })
    }

    /// a key must stay inside the cache directory: queue-ids are uppercase
    /// alphanumerics, user-cache keys add the address charset. anything else
    /// is refused so a hostile Received header cannot traverse paths.
    fn path_for(&self, key: &str) -> anyhow::Result<std::path::PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+'))
            || key.starts_with('.')
        {
            anyhow::bail!("invalid cache key: '{}'", key)
        }
        Ok(self.dirpath.join(key))
    }

    /// store a value under `key` with a fresh TTL.
    ///
    /// # Errors
    ///
    /// * serialization or filesystem failure
    pub fn set<T: serde::Serialize>(&self, key: &str, payload: &T) -> anyhow::Result<()> {
        let target = self.path_for(key)?;
        let scratch = self.dirpath.join(format!(
            ".{}-{}",
            std::process::id(),
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(8)
                .collect::<String>()
        ));

        let wrapped = Wrapped {
            expires: unix_now() + self.ttl.as_secs(),
            payload,
        };
        std::fs::write(&scratch, serde_json::to_string(&wrapped)?)
            .with_context(|| format!("cannot write cache scratch {}", scratch.display()))?;
        std::fs::rename(&scratch, &target)
            .with_context(|| format!("cannot move cache entry into place for '{key}'"))?;

        log::debug!(target: "cache", "key '{}' written, ttl {}s", key, self.ttl.as_secs());
        Ok(())
    }

    /// fetch the value stored under `key`, dropping it when expired.
    ///
    /// # Errors
    ///
    /// * the entry exists but cannot be read or parsed
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let target = self.path_for(key)?;
        let raw = match std::fs::read_to_string(&target) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("cannot read cache entry '{key}'"));
            }
        };

        let wrapped = serde_json::from_str::<Wrapped<T>>(&raw)
            .with_context(|| format!("cache entry '{key}' is corrupted"))?;

        if wrapped.expires <= unix_now() {
            let _ = std::fs::remove_file(&target);
            log::debug!(target: "cache", "key '{}' expired", key);
            return Ok(None);
        }
        Ok(Some(wrapped.payload))
    }

    /// rewrite an existing entry unchanged to push its expiry forward.
    ///
    /// # Errors
    ///
    /// * the rewrite fails
    pub fn touch(&self, key: &str) -> anyhow::Result<bool> {
        match self.get::<serde_json::Value>(key)? {
            Some(payload) => {
                self.set(key, &payload)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// delete the entry, missing keys are fine.
    ///
    /// # Errors
    ///
    /// * filesystem failure other than not-found
    pub fn remove(&self, key: &str) -> anyhow::Result<()> {
        match std::fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("cannot remove cache entry '{key}'")),
        }
    }

    /// the key under which a message session is shared across daemons.
    #[must_use]
    pub fn queue_key(queue_id: &str) -> String {
        format!("QUEUE-{queue_id}")
    }

    /// the key under which a resolved scanner user is remembered.
    #[must_use]
    pub fn user_key(recipient: &str) -> String {
        format!("USER-{recipient}")
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or(std::time::Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl: std::time::Duration) -> QueueCache {
        let dir = std::env::temp_dir().join(format!(
            "decency-cache-test-{}",
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(8)
                .collect::<String>()
        ));
        QueueCache::new(dir, ttl).unwrap()
    }

    #[test]
    fn round_trip() {
        let cache = cache(DEFAULT_TTL);
        let entry = CacheEntry {
            queue_id: "AB12CD".to_string(),
            score: -42,
            details: vec!["policy: -42".to_string()],
            ..CacheEntry::default()
        };

        cache.set(&QueueCache::queue_key("AB12CD"), &entry).unwrap();
        let read = cache
            .get::<CacheEntry>(&QueueCache::queue_key("AB12CD"))
            .unwrap()
            .unwrap();
        assert_eq!(read, entry);
    }

    #[test]
    fn expired_entries_vanish() {
        let cache = cache(std::time::Duration::ZERO);
        cache.set("QUEUE-XY99", &CacheEntry::default()).unwrap();
        assert_eq!(cache.get::<CacheEntry>("QUEUE-XY99").unwrap(), None);
    }

    #[test]
    fn hostile_keys_are_refused() {
        let cache = cache(DEFAULT_TTL);
        assert!(cache.get::<CacheEntry>("../../etc/passwd").is_err());
        assert!(cache.get::<CacheEntry>("").is_err());
        assert!(cache.get::<CacheEntry>(".hidden").is_err());
    }

    #[test]
    fn touch_refreshes_known_keys_only() {
        let cache = cache(DEFAULT_TTL);
        assert!(!cache.touch("QUEUE-NOPE").unwrap());

        cache.set("QUEUE-YES1", &CacheEntry::default()).unwrap();
        assert!(cache.touch("QUEUE-YES1").unwrap());
    }

    #[test]
    fn missing_key_is_none_and_remove_is_quiet() {
        let cache = cache(DEFAULT_TTL);
        assert_eq!(cache.get::<CacheEntry>("QUEUE-MISSING").unwrap(), None);
        cache.remove("QUEUE-MISSING").unwrap();
    }
}
