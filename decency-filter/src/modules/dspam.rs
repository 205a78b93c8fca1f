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
use crate::{
    cmd::{CmdFilter, CmdOutput, CmdVariant},
    module::{CorpusLabel, FilterModule},
    signal::{FilterResult, FilterSignal},
};
use decency_common::{queue_cache::QueueCache, session::MessageSession, spool::Spool};
use decency_config::{ConfigCmd, ConfigFilterModule};

/// dspam in classification mode (`--classify --stdout`); the verdict comes
/// back as `X-DSPAM-*` report headers.
pub struct Dspam {
    name: String,
    timeout: std::time::Duration,
    max_size: u64,
    disable_train: bool,
    weight_spam: i64,
    weight_innocent: i64,
    cmd: CmdFilter,
}

impl Dspam {
    ///
    #[must_use]
    pub fn new(
        entry: &ConfigFilterModule,
        cmd: ConfigCmd,
        default_user: Option<String>,
        spool: Spool,
        cache: QueueCache,
    ) -> Self {
        Self {
            name: entry.name.clone(),
            timeout: entry.timeout,
            max_size: entry.max_size,
            disable_train: entry.disable_train,
            weight_spam: entry.weight_spam,
            weight_innocent: entry.weight_innocent,
            cmd: CmdFilter::new(&entry.name, cmd, None, default_user, spool, cache),
        }
    }

    /// translate the report headers into a score delta.
    fn handle_filter_result(&self, output: &CmdOutput) -> anyhow::Result<(i64, String)> {
        if output.header_block.is_empty() {
            anyhow::bail!(
                "dspam produced no report (exit code {}); check the module command",
                output.exit_code
            )
        }

        let field = |name: &str| {
            output
                .header_block
                .lines()
                .find_map(|line| line.strip_prefix(name))
                .map(str::trim)
        };

        let result = field("X-DSPAM-Result:")
            .ok_or_else(|| anyhow::anyhow!("dspam report carries no X-DSPAM-Result header"))?;
        let confidence = field("X-DSPAM-Confidence:").unwrap_or("?");

        let delta = match result {
            "Spam" => self.weight_spam,
            "Innocent" | "Whitelisted" => self.weight_innocent,
            other => anyhow::bail!("dspam returned an unknown result '{}'", other),
        };
        Ok((delta, format!("result={result}; confidence={confidence}")))
    }

    async fn run_training(
        &self,
        session: &mut MessageSession,
        variant: CmdVariant,
    ) -> anyhow::Result<()> {
        let output = self.cmd.execute(session, variant).await?;
        if output.exit_code != 0 {
            anyhow::bail!(
                "dspam training command failed with exit code {}",
                output.exit_code
            )
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl FilterModule for Dspam {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> std::time::Duration {
        self.timeout
    }

    fn max_size(&self) -> u64 {
        self.max_size
    }

    async fn handle(&self, session: &mut MessageSession) -> FilterResult<()> {
        let output = self
            .cmd
            .execute(session, CmdVariant::Classify)
            .await
            .map_err(FilterSignal::Other)?;
        let (delta, info) = self
            .handle_filter_result(&output)
            .map_err(FilterSignal::Other)?;

        if delta != 0 {
            session.add_score(delta, format!("{}: {}", self.name, info));
        }
        Ok(())
    }

    fn trainable(&self) -> bool {
        !self.disable_train
            && (self.cmd.has_variant(CmdVariant::LearnSpam)
                || self.cmd.has_variant(CmdVariant::LearnHam))
    }

    async fn train(&self, session: &mut MessageSession, label: CorpusLabel) -> anyhow::Result<()> {
        self.run_training(
            session,
            match label {
                CorpusLabel::Spam => CmdVariant::LearnSpam,
                CorpusLabel::Ham => CmdVariant::LearnHam,
            },
        )
        .await
    }

    async fn untrain(
        &self,
        session: &mut MessageSession,
        label: CorpusLabel,
    ) -> anyhow::Result<()> {
        self.run_training(
            session,
            match label {
                CorpusLabel::Spam => CmdVariant::UnlearnSpam,
                CorpusLabel::Ham => CmdVariant::UnlearnHam,
            },
        )
        .await
    }
}
