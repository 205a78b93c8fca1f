/*
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
*/
use crate::session::MessageSession;
use anyhow::Context;

/// working areas under the spool root.
#[derive(Debug, PartialEq, Eq, Copy, Clone, strum::EnumIter)]
pub enum SpoolArea {
    /// per-filter scratch files.
    Temp,
    /// in-flight messages (reserved).
    Queue,
    /// MIME parser scratch.
    Mime,
    /// re-inject failures kept for manual recovery.
    Failure,
    /// virus-quarantined messages.
    Quarantine,
}

impl std::fmt::Display for SpoolArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Temp => "temp",
            Self::Queue => "queue",
            Self::Mime => "mime",
            Self::Failure => "failure",
            Self::Quarantine => "quarantine",
        })
    }
}

impl std::str::FromStr for SpoolArea {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temp" => Ok(Self::Temp),
            "queue" => Ok(Self::Queue),
            "mime" => Ok(Self::Mime),
            "failure" => Ok(Self::Failure),
            "quarantine" => Ok(Self::Quarantine),
            _ => anyhow::bail!("not a valid spool area: '{}'", s),
        }
    }
}

/// envelope metadata written next to each spool file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SpoolInfo {
    /// envelope sender, `None` for the null reverse-path.
    pub from: Option<String>,
    /// envelope recipients.
    pub to: Vec<String>,
    /// message size in bytes.
    pub size: u64,
}

/// The spool directory: received messages at the root, working areas below.
#[derive(Debug, Clone)]
pub struct Spool {
    root: std::path::PathBuf,
}

impl Spool {
    /// open the spool. the root must already exist (a missing spool is an
    /// operator error and fatal at startup); the working areas are created.
    ///
    /// # Errors
    ///
    /// * the root is missing
    /// * a working area cannot be created
    pub fn open(root: impl Into<std::path::PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            anyhow::bail!("spool directory {} does not exist", root.display())
        }
        for area in <SpoolArea as strum::IntoEnumIterator>::iter() {
            let dir = root.join(format!("{area}"));
            std::fs::DirBuilder::new()
                .recursive(true)
                .create(&dir)
                .with_context(|| format!("cannot create spool area {}", dir.display()))?;
        }
        Ok(Self { root })
    }

    /// the spool root.
    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// path of a working area.
    #[must_use]
    pub fn area(&self, area: SpoolArea) -> std::path::PathBuf {
        self.root.join(format!("{area}"))
    }

    /// create a uniquely named `mail-XXXXXX` spool file.
    ///
    /// # Errors
    ///
    /// * no unique name could be claimed
    pub fn create_message(&self) -> anyhow::Result<(String, std::fs::File)> {
        // create_new loses the race politely when two workers pick the
        // same suffix; try a fresh one.
        for _ in 0..16 {
            let name = format!("mail-{}", unique_suffix());
            match std::fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(self.root.join(&name))
            {
                Ok(file) => return Ok((name, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("cannot create spool file under {}", self.root.display())
                    });
                }
            }
        }
        anyhow::bail!("cannot claim a unique spool file name")
    }

    /// path of the spool file for a message id.
    #[must_use]
    pub fn message_path(&self, id: &str) -> std::path::PathBuf {
        self.root.join(id)
    }

    /// write the `.info` sidecar next to the spool file.
    ///
    /// # Errors
    ///
    /// * serialization or filesystem failure
    pub fn write_sidecar(&self, id: &str, info: &SpoolInfo) -> anyhow::Result<()> {
        let path = self.root.join(format!("{id}.info"));
        std::fs::write(&path, serde_json::to_string(info)?)
            .with_context(|| format!("cannot write sidecar {}", path.display()))
    }

    /// read the `.info` sidecar of a message.
    ///
    /// # Errors
    ///
    /// * the sidecar is missing or corrupted
    pub fn read_sidecar(&self, id: &str) -> anyhow::Result<SpoolInfo> {
        let path = self.root.join(format!("{id}.info"));
        serde_json::from_str(
            &std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read sidecar {}", path.display()))?,
        )
        .with_context(|| format!("sidecar {} is corrupted", path.display()))
    }

    /// a fresh scratch file path in the temp area.
    #[must_use]
    pub fn scratch_path(&self, prefix: &str) -> std::path::PathBuf {
        self.area(SpoolArea::Temp)
            .join(format!("{prefix}-{}", unique_suffix()))
    }

    /// copy the message into quarantine, named
    /// `<timestamp>_FROM_<from>_TO_<to>-XXXXXX`.
    ///
    /// # Errors
    ///
    /// * the copy fails
    pub fn quarantine(&self, session: &MessageSession) -> anyhow::Result<std::path::PathBuf> {
        let from = session
            .from
            .as_ref()
            .map_or_else(|| "bounce".to_string(), crate::address::Address::file_part);
        let to = session
            .to
            .first()
            .map_or_else(|| "unknown".to_string(), crate::address::Address::file_part);

        let target = self.area(SpoolArea::Quarantine).join(format!(
            "{}_FROM_{}_TO_{}-{}",
            unix_now(),
            from,
            to,
            unique_suffix()
        ));
        std::fs::copy(&session.file, &target)
            .with_context(|| format!("cannot quarantine to {}", target.display()))?;
        Ok(target)
    }

    /// keep a copy of a message whose re-injection failed, for manual recovery.
    ///
    /// # Errors
    ///
    /// * the copy fails
    pub fn keep_failure(&self, session: &MessageSession) -> anyhow::Result<std::path::PathBuf> {
        let target = self.area(SpoolArea::Failure).join(&session.id);
        // persist the rewritten form when there is one; that is what would
        // have reached the downstream listener.
        std::fs::write(&target, session.wire_content()?)
            .with_context(|| format!("cannot keep failed message {}", target.display()))?;
        Ok(target)
    }

    /// drop the spool file and its sidecar once the pipeline is done.
    pub fn remove_message(&self, id: &str) {
        for path in [self.root.join(id), self.root.join(format!("{id}.info"))] {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("cannot clean spool artifact {}: {}", path.display(), e);
                }
            }
        }
    }
}

fn unique_suffix() -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(6)
        .collect::<String>()
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or(std::time::Duration::ZERO)
        .as_secs()
}
