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
use decency_common::{queue_cache::QueueCache, spool::Spool};
use decency_config::Config;
use decency_filter::{
    disposition::DispositionEngine,
    module::CorpusLabel,
    pipeline::PipelineEngine,
    scoring::PolicyScoringVerifier,
    stats::StatsCollector,
    train::{train_corpus, TrainOptions, TrainReport},
};
use decency_server::{Server, SmtpReinjector};

fn build_runtime(worker_count: usize) -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_count)
        .enable_all()
        .build()
        .context("cannot build the tokio runtime")
}

/// open the shared resources every mode needs.
fn open_shared(config: &Config) -> anyhow::Result<(Spool, QueueCache)> {
    let spool = Spool::open(&config.server.spool.dirpath)
        .context("the spool directory must exist before the filter starts")?;
    let cache = QueueCache::new(&config.cache.dirpath, config.cache.ttl)
        .context("cannot open the shared scoring cache")?;
    Ok((spool, cache))
}

/// the verify key is mandatory once accept_scoring is on; a missing or
/// unreadable key is a startup failure, not a silent downgrade.
fn build_verifier(config: &Config) -> anyhow::Result<Option<PolicyScoringVerifier>> {
    if !config.filter.scoring.accept_scoring {
        return Ok(None);
    }
    let path = config
        .filter
        .scoring
        .verify_key
        .as_ref()
        .context("accept_scoring is enabled but no verify_key is configured")?;
    PolicyScoringVerifier::from_file(path).map(Some)
}

/// Run the content filter daemon on an already bound ingress socket.
///
/// # Errors
///
/// * unusable configuration (missing spool, unreadable verify key, ...)
/// * the accept loop died
pub fn start_filter(
    config: std::sync::Arc<Config>,
    socket: std::net::TcpListener,
) -> anyhow::Result<()> {
    let (spool, cache) = open_shared(&config)?;
    let verifier = build_verifier(&config)?;
    let modules = decency_filter::build_modules(&config.filter, &spool, &cache)?;

    log::info!(
        "decency content filter starting: {} module(s), spool {}",
        modules.len(),
        config.server.spool.dirpath.display()
    );

    build_runtime(config.server.worker_count)?.block_on(async move {
        let stats = if config.stats.enable {
            Some(
                StatsCollector::open(&config.stats.filepath, config.stats.flush_interval)
                    .context("cannot open the statistics database")?,
            )
        } else {
            None
        };

        let disposition = DispositionEngine::new(
            config.filter.spam.clone(),
            config.filter.virus.clone(),
            config.server.domain.clone(),
            spool.clone(),
            Box::new(SmtpReinjector::new(&config.reinject)),
        );
        let pipeline = std::sync::Arc::new(PipelineEngine::new(
            modules,
            config.filter.spam.clone(),
            verifier,
            cache,
            spool.clone(),
            stats,
            disposition,
        ));

        Server::new(config.clone(), socket, spool, pipeline)?
            .listen_and_serve()
            .await
    })
}

/// Run the offline training driver and return the per-module report.
///
/// # Errors
///
/// * unusable configuration
/// * the corpus directory cannot be read
pub fn start_training(
    config: &Config,
    corpus: &std::path::Path,
    label: &str,
    options: TrainOptions,
) -> anyhow::Result<TrainReport> {
    let label = label.parse::<CorpusLabel>()?;
    let (spool, cache) = open_shared(config)?;
    let modules = decency_filter::build_modules(&config.filter, &spool, &cache)?;

    build_runtime(config.server.worker_count)?
        .block_on(async move { train_corpus(&modules, corpus, label, &options).await })
}
