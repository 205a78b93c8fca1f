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
use decency_config::log_channel::FILTER;

/// one accounting event emitted by the pipeline.
#[derive(Debug, Clone)]
pub enum StatEvent {
    /// a module finished (or was skipped/abandoned) for one message.
    ModuleRun {
        /// module name.
        module: String,
        /// uppercase status tag (OK, SPAM, VIRUS, DROP, TIMEOUT, TOOBIG, ERROR).
        status: String,
        /// score contributed during this run.
        score_delta: i64,
        /// wall clock of the run.
        elapsed: std::time::Duration,
    },
    /// a message finished for a sender domain.
    SenderDomain {
        /// domain of the envelope sender.
        domain: String,
        /// final pipeline status.
        status: String,
    },
}

/// Per-module and per-sender-domain counters in an embedded sqlite database.
///
/// Events travel through an unbounded channel into a single writer task, so
/// pipeline workers never block on the database; batches are flushed on a
/// fixed interval and on shutdown.
pub struct StatsCollector {
    sender: tokio::sync::mpsc::UnboundedSender<StatEvent>,
    handle: tokio::task::JoinHandle<()>,
}

impl StatsCollector {
    /// open the database and start the writer task.
    ///
    /// # Errors
    ///
    /// * the database directory cannot be created
    /// * the schema cannot be installed
    pub fn open(
        filepath: &std::path::Path,
        flush_interval: std::time::Duration,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = filepath.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("cannot create statistics directory {}", parent.display())
            })?;
        }
        let connection = init_database(filepath)?;

        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            if let Err(e) = writer(connection, receiver, flush_interval).await {
                log::error!(target: FILTER, "statistics writer died: {}", e);
            }
        });

        Ok(Self { sender, handle })
    }

    /// record one module run.
    pub fn record_module(
        &self,
        module: &str,
        status: &str,
        score_delta: i64,
        elapsed: std::time::Duration,
    ) {
        self.record(StatEvent::ModuleRun {
            module: module.to_string(),
            status: status.to_string(),
            score_delta,
            elapsed,
        });
    }

    /// record the final status for the sender's domain.
    pub fn record_sender(&self, domain: &str, status: &str) {
        self.record(StatEvent::SenderDomain {
            domain: domain.to_string(),
            status: status.to_string(),
        });
    }

    fn record(&self, event: StatEvent) {
        if self.sender.send(event).is_err() {
            log::warn!(target: FILTER, "statistics writer is gone, event lost");
        }
    }

    /// flush outstanding events and stop the writer.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = self.handle.await;
    }
}

fn init_database(filepath: &std::path::Path) -> anyhow::Result<rusqlite::Connection> {
    let connection = rusqlite::Connection::open(filepath)
        .with_context(|| format!("cannot open statistics database {}", filepath.display()))?;
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS module_runs (
                module TEXT NOT NULL,
                status TEXT NOT NULL,
                runs INTEGER NOT NULL DEFAULT 0,
                score_sum INTEGER NOT NULL DEFAULT 0,
                elapsed_ms_sum INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (module, status)
            );
            CREATE TABLE IF NOT EXISTS sender_domains (
                domain TEXT NOT NULL,
                status TEXT NOT NULL,
                messages INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (domain, status)
            );",
        )
        .context("cannot install the statistics schema")?;
    Ok(connection)
}

async fn writer(
    connection: rusqlite::Connection,
    mut receiver: tokio::sync::mpsc::UnboundedReceiver<StatEvent>,
    flush_interval: std::time::Duration,
) -> anyhow::Result<()> {
    let mut buffer = Vec::<StatEvent>::new();
    let mut ticker = tokio::time::interval(flush_interval.max(std::time::Duration::from_secs(1)));

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Some(event) => buffer.push(event),
                None => {
                    flush(&connection, &mut buffer)?;
                    return Ok(());
                }
            },
            _ = ticker.tick() => flush(&connection, &mut buffer)?,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn flush(connection: &rusqlite::Connection, buffer: &mut Vec<StatEvent>) -> anyhow::Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }

    for event in buffer.drain(..) {
        match event {
            StatEvent::ModuleRun {
                module,
                status,
                score_delta,
                elapsed,
            } => {
                connection.execute(
                    "INSERT INTO module_runs (module, status, runs, score_sum, elapsed_ms_sum)
                     VALUES (?1, ?2, 1, ?3, ?4)
                     ON CONFLICT (module, status) DO UPDATE SET
                        runs = runs + 1,
                        score_sum = score_sum + excluded.score_sum,
                        elapsed_ms_sum = elapsed_ms_sum + excluded.elapsed_ms_sum",
                    rusqlite::params![module, status, score_delta, elapsed.as_millis() as i64],
                )?;
            }
            StatEvent::SenderDomain { domain, status } => {
                connection.execute(
                    "INSERT INTO sender_domains (domain, status, messages)
                     VALUES (?1, ?2, 1)
                     ON CONFLICT (domain, status) DO UPDATE SET
                        messages = messages + 1",
                    rusqlite::params![domain, status],
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_land_in_the_database() {
        let dir = std::env::temp_dir().join(format!(
            "decency-stats-test-{}",
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(8)
                .collect::<String>()
        ));
        let filepath = dir.join("stats.db");

        let collector =
            StatsCollector::open(&filepath, std::time::Duration::from_secs(60)).unwrap();
        collector.record_module(
            "dspam",
            "OK",
            -60,
            std::time::Duration::from_millis(120),
        );
        collector.record_module(
            "dspam",
            "OK",
            -100,
            std::time::Duration::from_millis(80),
        );
        collector.record_module("clamav", "VIRUS", 0, std::time::Duration::from_millis(5));
        collector.record_sender("x.org", "spam");
        collector.shutdown().await;

        let connection = rusqlite::Connection::open(&filepath).unwrap();
        let (runs, score_sum): (i64, i64) = connection
            .query_row(
                "SELECT runs, score_sum FROM module_runs WHERE module = 'dspam' AND status = 'OK'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(runs, 2);
        assert_eq!(score_sum, -160);

        let messages: i64 = connection
            .query_row(
                "SELECT messages FROM sender_domains WHERE domain = 'x.org' AND status = 'spam'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(messages, 1);
    }
}
