//! decency configuration

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::doc_markdown)]

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

/// targets for log! macro
pub mod log_channel {
    /// ingress smtp listener
    pub const RECEIVER: &str = "receiver";
    /// filter pipeline
    pub const FILTER: &str = "filter";
    /// smtp client pushing messages downstream
    pub const REINJECT: &str = "reinject";
    /// shared scoring cache
    pub const CACHE: &str = "cache";
    /// offline training driver
    pub const TRAIN: &str = "train";
}

#[cfg(test)]
mod tests;

mod parser {
    pub mod semver;
    pub mod socket_addr;
}

mod config;
mod default;
mod log4rs_helper;

pub use config::*;
pub use log4rs_helper::get_log4rs_config;

/// Re-exported dependencies
pub mod re {
    pub use humantime_serde;
    pub use log4rs;
}

use anyhow::Context;

impl Config {
    /// Parse a [`Config`] with TOML format
    ///
    /// # Errors
    ///
    /// * data is not a valid TOML
    /// * one field is unknown
    /// * the version requirement is not fulfilled
    pub fn from_toml(input: &str) -> anyhow::Result<Self> {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct VersionRequirement {
            #[serde(
                serialize_with = "crate::parser::semver::serialize",
                deserialize_with = "crate::parser::semver::deserialize"
            )]
            version_requirement: semver::VersionReq,
        }

        let req = toml::from_str::<VersionRequirement>(input)
            .context("the `version_requirement` field is missing or invalid")?;
        let pkg_version = semver::Version::parse(env!("CARGO_PKG_VERSION"))?;

        if !req.version_requirement.matches(&pkg_version) {
            anyhow::bail!(
                "Version requirement not fulfilled: expected '{}' but got '{}'",
                req.version_requirement,
                env!("CARGO_PKG_VERSION")
            );
        }

        toml::from_str::<Self>(input).map_err(anyhow::Error::new)
    }
}
