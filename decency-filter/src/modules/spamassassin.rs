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

/// spamassassin through `spamc -c`: one `score/threshold` report line,
/// exit code 1 when the score crosses the threshold.
pub struct SpamAssassin {
    name: String,
    timeout: std::time::Duration,
    max_size: u64,
    disable_train: bool,
    weight_spam: i64,
    weight_innocent: i64,
    cmd: CmdFilter,
}

impl SpamAssassin {
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

    fn handle_filter_result(&self, output: &CmdOutput) -> anyhow::Result<(i64, String)> {
        let report = output
            .header_block
            .lines()
            .next()
            .map(str::trim)
            .unwrap_or_default();
        if report.is_empty() {
            anyhow::bail!(
                "spamc produced no report (exit code {}); check the module command",
                output.exit_code
            )
        }

        let (score, threshold) = report
            .split_once('/')
            .and_then(|(score, threshold)| {
                Some((
                    score.trim().parse::<f64>().ok()?,
                    threshold.trim().parse::<f64>().ok()?,
                ))
            })
            .ok_or_else(|| anyhow::anyhow!("unparsable spamc report line '{}'", report))?;

        let is_spam = output.exit_code == 1 || score >= threshold;
        Ok((
            if is_spam {
                self.weight_spam
            } else {
                self.weight_innocent
            },
            format!("score={score}/{threshold}"),
        ))
    }
}

#[async_trait::async_trait]
impl FilterModule for SpamAssassin {
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
        let variant = match label {
            CorpusLabel::Spam => CmdVariant::LearnSpam,
            CorpusLabel::Ham => CmdVariant::LearnHam,
        };
        let output = self.cmd.execute(session, variant).await?;
        // sa-learn exits 0 whether or not the message was new to the corpus.
        if output.exit_code != 0 {
            anyhow::bail!(
                "sa-learn failed with exit code {}",
                output.exit_code
            )
        }
        Ok(())
    }

    async fn untrain(
        &self,
        session: &mut MessageSession,
        label: CorpusLabel,
    ) -> anyhow::Result<()> {
        let variant = match label {
            CorpusLabel::Spam => CmdVariant::UnlearnSpam,
            CorpusLabel::Ham => CmdVariant::UnlearnHam,
        };
        let output = self.cmd.execute(session, variant).await?;
        if output.exit_code != 0 {
            anyhow::bail!(
                "sa-learn --forget failed with exit code {}",
                output.exit_code
            )
        }
        Ok(())
    }
}
