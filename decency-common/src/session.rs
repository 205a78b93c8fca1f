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
use crate::{address::Address, mail::Mail, queue_cache::CacheEntry};
use anyhow::Context;

/// flag holding a message back from the downstream listener; honored by the
/// disposition engine, set by modules or inherited from the shared cache.
pub const FLAG_NO_REINJECT: &str = "no_reinject";

/// flag recording that a signed policy score was accepted for this message.
pub const FLAG_POLICY_SCORED: &str = "policy_scored";

/// queue-id token stamped by the MTA into the Received header.
const QUEUE_ID_PATTERN: &str = r"E?SMTP id ([A-Z0-9]+)";

fn queue_id_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(QUEUE_ID_PATTERN).expect("pattern is valid"))
}

/// Per-message scoring state, alive for exactly one pipeline run.
#[derive(Debug)]
pub struct MessageSession {
    /// stable identifier, derived from the spool file name.
    pub id: String,
    /// the MTA's queue identifier, correlation key across daemons.
    /// set once from the Received headers, never rewritten afterwards.
    queue_id: Option<String>,
    /// queue-id of the message this one supersedes (e.g. the bounced original).
    pub prev_id: Option<String>,
    /// queue-id assigned by the downstream listener at re-injection.
    pub next_id: Option<String>,
    /// path of the spool copy.
    pub file: std::path::PathBuf,
    /// size of the spool copy in bytes.
    pub file_size: u64,
    /// envelope sender, `None` for bounces.
    pub from: Option<Address>,
    /// envelope recipients.
    pub to: Vec<Address>,
    /// parsed message, materialized on first access.
    mail: Option<Mail>,
    /// accumulated score; more-negative = more-spammy.
    pub spam_score: i64,
    /// one entry per module that contributed to the score or classification.
    pub spam_details: Vec<String>,
    /// label of the virus found, if any. terminal once set.
    pub virus: Option<String>,
    /// free-form flags modules use to talk to each other.
    pub flags: std::collections::BTreeSet<String>,
}

impl MessageSession {
    /// build a session around a spool file.
    ///
    /// # Errors
    ///
    /// * the spool file does not exist or its metadata is unreadable
    pub fn new(
        file: impl Into<std::path::PathBuf>,
        from: Option<Address>,
        to: Vec<Address>,
    ) -> anyhow::Result<Self> {
        let file = file.into();
        let file_size = std::fs::metadata(&file)
            .with_context(|| format!("cannot stat spool file {}", file.display()))?
            .len();
        let id = file
            .file_name()
            .and_then(std::ffi::OsStr::to_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("spool path {} has no file name", file.display()))?;

        Ok(Self {
            id,
            queue_id: None,
            prev_id: None,
            next_id: None,
            file,
            file_size,
            from,
            to,
            mail: None,
            spam_score: 0,
            spam_details: vec![],
            virus: None,
            flags: std::collections::BTreeSet::new(),
        })
    }

    /// the correlation key, when one was found.
    #[must_use]
    pub fn queue_id(&self) -> Option<&str> {
        self.queue_id.as_deref()
    }

    /// record the queue-id. the first write wins; later calls are ignored so
    /// the key persisted at the end of the run is byte-identical to the one
    /// captured at the start.
    pub fn set_queue_id(&mut self, queue_id: String) {
        if self.queue_id.is_none() {
            self.queue_id = Some(queue_id);
        }
    }

    /// parse the spool file on first use and hand out the mutable message.
    ///
    /// # Errors
    ///
    /// * the spool file cannot be read
    pub fn mail(&mut self) -> anyhow::Result<&mut Mail> {
        if self.mail.is_none() {
            let raw = std::fs::read_to_string(&self.file)
                .with_context(|| format!("cannot read spool file {}", self.file.display()))?;
            self.mail = Some(Mail::parse(&raw));
        }
        Ok(self.mail.as_mut().expect("parsed just above"))
    }

    /// has the message already been materialized (and possibly rewritten)?
    #[must_use]
    pub const fn is_parsed(&self) -> bool {
        self.mail.is_some()
    }

    /// the bytes to hand to the downstream listener: the rewritten message
    /// when it was parsed, the raw spool copy otherwise.
    ///
    /// # Errors
    ///
    /// * the spool file cannot be read
    pub fn wire_content(&self) -> anyhow::Result<String> {
        self.mail.as_ref().map_or_else(
            || {
                std::fs::read_to_string(&self.file)
                    .with_context(|| format!("cannot read spool file {}", self.file.display()))
            },
            |mail| Ok(mail.to_raw()),
        )
    }

    /// add a signed delta to the score and record who contributed it.
    pub fn add_score(&mut self, delta: i64, detail: String) {
        self.spam_score += delta;
        self.spam_details.push(detail);
    }

    /// scan the Received headers (newest first) for the MTA queue-id token
    /// and record the first hit.
    ///
    /// # Errors
    ///
    /// * the spool file cannot be read
    pub fn capture_queue_id(&mut self) -> anyhow::Result<Option<String>> {
        let mail = self.mail()?;
        let found = mail.headers_named("Received").find_map(|received| {
            queue_id_regex()
                .captures(received)
                .map(|captures| captures[1].to_string())
        });

        if let Some(queue_id) = found {
            self.set_queue_id(queue_id);
        }
        Ok(self.queue_id.clone())
    }

    /// snapshot for the shared cache.
    #[must_use]
    pub fn snapshot(&self) -> Option<CacheEntry> {
        self.queue_id.as_ref().map(|queue_id| CacheEntry {
            queue_id: queue_id.clone(),
            prev_id: self.prev_id.clone(),
            next_id: self.next_id.clone(),
            orig_from: self.from.as_ref().map(ToString::to_string),
            is_bounce: self.from.is_none(),
            score: self.spam_score,
            details: self.spam_details.clone(),
            flags: self.flags.iter().cloned().collect(),
            from: self.from.as_ref().map(ToString::to_string),
            to: self.to.iter().map(ToString::to_string).collect(),
        })
    }

    /// inherit what an upstream daemon already learned about this message.
    ///
    /// the cached score seeds the accumulator, details and flags are merged,
    /// envelope values only fill holes.
    pub fn merge(&mut self, entry: &CacheEntry) {
        self.spam_score += entry.score;
        self.spam_details.extend(entry.details.iter().cloned());
        self.flags.extend(entry.flags.iter().cloned());
        self.prev_id = self.prev_id.take().or_else(|| entry.prev_id.clone());

        if self.from.is_none() {
            self.from = entry
                .from
                .as_ref()
                .and_then(|from| Address::try_from(from.clone()).ok());
        }
        if self.to.is_empty() {
            self.to = entry
                .to
                .iter()
                .filter_map(|to| Address::try_from(to.clone()).ok())
                .collect();
        }
    }
}
