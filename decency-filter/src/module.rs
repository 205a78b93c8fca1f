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
use crate::signal::FilterResult;
use decency_common::{session::MessageSession, status::FilterStatus};

/// label of an offline training corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusLabel {
    /// samples the scanners should reject.
    Spam,
    /// legitimate samples.
    Ham,
}

impl std::fmt::Display for CorpusLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Spam => "spam",
            Self::Ham => "ham",
        })
    }
}

impl std::str::FromStr for CorpusLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spam" => Ok(Self::Spam),
            "ham" => Ok(Self::Ham),
            _ => anyhow::bail!("not a valid corpus label: '{}' (spam|ham)", s),
        }
    }
}

/// Contract a filter module satisfies.
///
/// The pipeline owns the session and lends it to `handle` for the duration
/// of the call; a module must not retain the reference. Guards (`timeout`,
/// `max_size`) are declared here and armed by the engine, not by the module.
#[async_trait::async_trait]
pub trait FilterModule: Send + Sync {
    /// the configured module name, used in logs, details and statistics.
    fn name(&self) -> &str;

    /// per-run deadline; zero means unbounded.
    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::ZERO
    }

    /// messages larger than this are skipped; zero means no limit.
    fn max_size(&self) -> u64 {
        0
    }

    /// inspect (and possibly score or rewrite) the message.
    async fn handle(&self, session: &mut MessageSession) -> FilterResult<()>;

    /// invoked once the chain is done, before the disposition is computed.
    /// a module may overrule the status here.
    fn hook_pre_finish(&self, _session: &mut MessageSession, status: FilterStatus) -> FilterStatus {
        status
    }

    /// invoked after the disposition has been carried out.
    fn hook_post_finish(&self, _session: &mut MessageSession, _status: FilterStatus) {}

    /// does this module learn from corpora?
    fn trainable(&self) -> bool {
        false
    }

    /// feed one labeled sample to the module's learning backend.
    ///
    /// # Errors
    ///
    /// * the module does not support training
    /// * the learning command failed
    async fn train(&self, _session: &mut MessageSession, label: CorpusLabel) -> anyhow::Result<()> {
        anyhow::bail!("module '{}' cannot be trained ({})", self.name(), label)
    }

    /// revert a previous lesson.
    ///
    /// # Errors
    ///
    /// * the module does not support training
    /// * the unlearning command failed
    async fn untrain(
        &self,
        _session: &mut MessageSession,
        label: CorpusLabel,
    ) -> anyhow::Result<()> {
        anyhow::bail!("module '{}' cannot be untrained ({})", self.name(), label)
    }
}
