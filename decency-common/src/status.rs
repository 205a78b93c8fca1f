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

/// Classification of a message after (or while) running the filter pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum FilterStatus {
    /// no module objected, the message is re-injected as-is (or tagged GOOD).
    Ok,
    /// classified as spam by a module or by the scoring policy.
    Spam,
    /// a virus scanner flagged the message; terminal, further modules are skipped.
    Virus,
    /// a module requested the message to be silently swallowed.
    Drop,
}

impl std::fmt::Display for FilterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Spam => "spam",
            Self::Virus => "virus",
            Self::Drop => "drop",
        })
    }
}

/// Final action taken on a message, as seen by the calling MTA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum Disposition {
    /// delivered onward via re-injection.
    Ok,
    /// removed (deleted or quarantined); the MTA is told 250.
    Deleted,
    /// refused with a 5xx so the MTA generates the DSN.
    Bounce,
    /// processing failed (e.g. re-injection); handed back with a 5xx.
    Error,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Deleted => "DELETED",
            Self::Bounce => "BOUNCE",
            Self::Error => "ERROR",
        })
    }
}

impl Disposition {
    /// does the MTA get a 250 for this outcome?
    #[must_use]
    pub const fn accepted(self) -> bool {
        matches!(self, Self::Ok | Self::Deleted)
    }
}
