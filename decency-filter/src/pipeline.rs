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
    disposition::DispositionEngine,
    module::FilterModule,
    scoring::PolicyScoringVerifier,
    signal::FilterSignal,
    stats::StatsCollector,
};
use decency_common::{
    queue_cache::{CacheEntry, QueueCache},
    session::MessageSession,
    spool::Spool,
    status::{Disposition, FilterStatus},
};
use decency_config::{log_channel::FILTER, ConfigSpamPolicy, SpamBehavior};

/// the margin added to a module's declared deadline before it is abandoned.
const TIMEOUT_MARGIN: std::time::Duration = std::time::Duration::from_secs(1);

/// Ordered execution of the filter chain over one message.
///
/// The engine owns the process-wide read-only policy; sessions are lent to
/// it one at a time by the server workers.
pub struct PipelineEngine {
    modules: Vec<Box<dyn FilterModule>>,
    spam: ConfigSpamPolicy,
    verifier: Option<PolicyScoringVerifier>,
    cache: QueueCache,
    spool: Spool,
    stats: Option<StatsCollector>,
    disposition: DispositionEngine,
}

impl PipelineEngine {
    ///
    #[must_use]
    pub fn new(
        modules: Vec<Box<dyn FilterModule>>,
        spam: ConfigSpamPolicy,
        verifier: Option<PolicyScoringVerifier>,
        cache: QueueCache,
        spool: Spool,
        stats: Option<StatsCollector>,
        disposition: DispositionEngine,
    ) -> Self {
        Self {
            modules,
            spam,
            verifier,
            cache,
            spool,
            stats,
            disposition,
        }
    }

    /// run the whole pipeline over one spooled message and return what the
    /// SMTP frontend should tell the MTA.
    pub async fn run(&self, session: &mut MessageSession) -> (Disposition, String) {
        self.correlate(session);

        let mut status = FilterStatus::Ok;
        for module in &self.modules {
            if module.max_size() > 0 && session.file_size > module.max_size() {
                log::debug!(
                    target: FILTER,
                    "message '{}': skipping '{}', {} bytes over its {} limit",
                    session.id,
                    module.name(),
                    session.file_size,
                    module.max_size()
                );
                self.emit(module.name(), FilterSignal::FileTooBig.stat_label(), 0, std::time::Duration::ZERO);
                continue;
            }

            let score_before = session.spam_score;
            let details_before = session.spam_details.len();
            let started = std::time::Instant::now();

            let outcome = if module.timeout().is_zero() {
                module.handle(session).await
            } else {
                match tokio::time::timeout(
                    module.timeout() + TIMEOUT_MARGIN,
                    module.handle(session),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_elapsed) => {
                        // the abandoned module may have scored before the
                        // deadline fired; its contribution is void.
                        session.spam_score = score_before;
                        session.spam_details.truncate(details_before);
                        Err(FilterSignal::Timeout)
                    }
                }
            };

            let elapsed = started.elapsed();
            let delta = session.spam_score - score_before;

            let label = match outcome {
                Ok(()) => {
                    let classified = match self.spam.behavior {
                        SpamBehavior::Strict => delta < 0,
                        SpamBehavior::Scoring => session.spam_score <= self.spam.threshold,
                        SpamBehavior::Ignore => false,
                    };
                    if classified {
                        status = FilterStatus::Spam;
                        "SPAM"
                    } else {
                        "OK"
                    }
                }
                Err(signal) => {
                    let label = signal.stat_label();
                    match signal {
                        FilterSignal::Spam(detail) => {
                            session.spam_details.push(detail);
                            // a virus verdict from an earlier hook is terminal.
                            status = if session.virus.is_some() {
                                FilterStatus::Virus
                            } else {
                                FilterStatus::Spam
                            };
                        }
                        FilterSignal::Virus(found) => {
                            session.spam_details.push(format!("{}: {}", module.name(), found));
                            session.virus = Some(found);
                            status = FilterStatus::Virus;
                        }
                        FilterSignal::Drop(reason) => {
                            log::info!(
                                target: FILTER,
                                "message '{}': dropped by '{}': {}",
                                session.id,
                                module.name(),
                                reason
                            );
                            status = FilterStatus::Drop;
                        }
                        FilterSignal::Timeout => {
                            log::error!(
                                target: FILTER,
                                "message '{}': module '{}' exceeded its {}s deadline, continuing",
                                session.id,
                                module.name(),
                                module.timeout().as_secs()
                            );
                        }
                        FilterSignal::FileTooBig => {
                            log::debug!(
                                target: FILTER,
                                "message '{}': '{}' refused the message size",
                                session.id,
                                module.name()
                            );
                        }
                        FilterSignal::Other(error) => {
                            log::error!(
                                target: FILTER,
                                "message '{}': module '{}' failed: {}",
                                session.id,
                                module.name(),
                                error
                            );
                        }
                    }
                    label
                }
            };

            self.emit(module.name(), label, delta, elapsed);

            if status != FilterStatus::Ok {
                break;
            }
        }

        for module in &self.modules {
            status = module.hook_pre_finish(session, status);
        }

        let (disposition, detail) = self.disposition.dispose(session, status).await;

        for module in &self.modules {
            module.hook_post_finish(session, status);
        }

        self.persist(session);
        if let (Some(stats), Some(from)) = (&self.stats, &session.from) {
            stats.record_sender(from.domain(), &status.to_string());
        }
        self.spool.remove_message(&session.id);

        log::info!(
            target: FILTER,
            "message '{}' (queue-id {:?}): status {}, disposition {}, score {}",
            session.id,
            session.queue_id(),
            status,
            disposition,
            session.spam_score
        );
        (disposition, detail)
    }

    /// pull what the policy server already knows about this message.
    fn correlate(&self, session: &mut MessageSession) {
        match session.capture_queue_id() {
            Ok(Some(queue_id)) => {
                match self.cache.get::<CacheEntry>(&QueueCache::queue_key(&queue_id)) {
                    Ok(Some(entry)) => {
                        log::debug!(
                            target: FILTER,
                            "message '{}': inheriting cache entry for queue-id {} (score {})",
                            session.id,
                            queue_id,
                            entry.score
                        );
                        session.merge(&entry);
                    }
                    Ok(None) => {}
                    Err(e) => log::error!(
                        target: FILTER,
                        "message '{}': cache lookup failed: {}",
                        session.id,
                        e
                    ),
                }
            }
            Ok(None) => log::debug!(
                target: FILTER,
                "message '{}': no queue-id in the Received headers",
                session.id
            ),
            Err(e) => log::error!(
                target: FILTER,
                "message '{}': cannot scan the Received headers: {}",
                session.id,
                e
            ),
        }

        if let Some(verifier) = &self.verifier {
            if let Err(e) = verifier.verify_and_merge(session) {
                log::error!(
                    target: FILTER,
                    "message '{}': scoring verification failed: {}",
                    session.id,
                    e
                );
            }
        }
    }

    /// write the current, successor and predecessor entries back.
    fn persist(&self, session: &MessageSession) {
        let Some(snapshot) = session.snapshot() else {
            return;
        };
        let queue_id = snapshot.queue_id.clone();

        if let Err(e) = self.cache.set(&QueueCache::queue_key(&queue_id), &snapshot) {
            log::error!(target: FILTER, "cannot persist session for {}: {}", queue_id, e);
        }

        if let Some(next_id) = &session.next_id {
            let successor = CacheEntry {
                queue_id: next_id.clone(),
                prev_id: Some(queue_id.clone()),
                next_id: None,
                ..snapshot.clone()
            };
            if let Err(e) = self.cache.set(&QueueCache::queue_key(next_id), &successor) {
                log::error!(target: FILTER, "cannot link successor {}: {}", next_id, e);
            }
        }

        if let Some(prev_id) = &session.prev_id {
            match self.cache.touch(&QueueCache::queue_key(prev_id)) {
                Ok(_) => {}
                Err(e) => {
                    log::error!(target: FILTER, "cannot refresh predecessor {}: {}", prev_id, e);
                }
            }
        }
    }

    fn emit(&self, module: &str, status: &str, delta: i64, elapsed: std::time::Duration) {
        log::debug!(
            target: FILTER,
            "stats: module={} status={} delta={} elapsed={}ms",
            module,
            status,
            delta,
            elapsed.as_millis()
        );
        if let Some(stats) = &self.stats {
            stats.record_module(module, status, delta, elapsed);
        }
    }
}
