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

/// A mailbox address, well-formed by construction.
///
/// Stored split: the scanner modules address the local part (as the
/// `%user%` candidate) and the domain (per-domain statistics, postmaster
/// targets) far more often than the joined form, which only matters on the
/// wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Address {
    local: String,
    domain: String,
}

impl std::str::FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Err(error) = addr::parse_email_address(s) {
            anyhow::bail!("'{}' is not a valid address: {}", s, error)
        }
        // a quoted local part may itself contain '@'; the separator is the
        // last one.
        let (local, domain) = s
            .rsplit_once('@')
            .ok_or_else(|| anyhow::anyhow!("'{}' carries no domain", s))?;
        Ok(Self {
            local: local.to_string(),
            domain: domain.to_string(),
        })
    }
}

impl TryFrom<String> for Address {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl Address {
    /// the part before the `@`, what a scanner knows the mailbox as.
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local
    }

    /// the part after the `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// the address with the `@` rewritten to `-at-`, safe to embed in a
    /// quarantine file name.
    #[must_use]
    pub fn file_part(&self) -> String {
        format!("{}-at-{}", self.local, self.domain)
    }
}
