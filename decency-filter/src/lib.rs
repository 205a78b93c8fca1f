//! decency filter pipeline
//!
//! The per-message state machine: an ordered chain of filter modules runs
//! over a spooled message, their verdicts are combined under the configured
//! spam/virus policy, and the disposition engine re-injects, bounces,
//! quarantines, deletes or tags the result.

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

/// helper for modules delegating to an external scanner.
pub mod cmd;
/// turns the terminal status into the final action.
pub mod disposition;
/// the module contract.
pub mod module;
/// the concrete scanner modules.
pub mod modules;
/// ordered execution of the module chain.
pub mod pipeline;
/// verification of the policy server's signed scoring header.
pub mod scoring;
/// signals a module run can end with.
pub mod signal;
/// per-module counters in an embedded database.
pub mod stats;
/// offline corpus training driver.
pub mod train;

/// build the configured module chain.
///
/// disabled modules are kept out of the chain entirely; the pipeline never
/// sees them.
///
/// # Errors
///
/// * a module configuration is unusable
pub fn build_modules(
    config: &decency_config::ConfigFilter,
    spool: &decency_common::spool::Spool,
    cache: &decency_common::queue_cache::QueueCache,
) -> anyhow::Result<Vec<Box<dyn module::FilterModule>>> {
    let mut chain = Vec::<Box<dyn module::FilterModule>>::with_capacity(config.modules.len());

    for entry in &config.modules {
        if entry.disable {
            log::info!(
                target: decency_config::log_channel::FILTER,
                "module '{}' is disabled, skipping",
                entry.name
            );
            continue;
        }
        chain.push(match &entry.kind {
            decency_config::ConfigFilterKind::Dspam { cmd } => Box::new(modules::dspam::Dspam::new(
                entry,
                cmd.clone(),
                config.default_user.clone(),
                spool.clone(),
                cache.clone(),
            )),
            decency_config::ConfigFilterKind::Bogofilter { cmd } => {
                Box::new(modules::bogofilter::Bogofilter::new(
                    entry,
                    cmd.clone(),
                    config.default_user.clone(),
                    spool.clone(),
                    cache.clone(),
                ))
            }
            decency_config::ConfigFilterKind::Spamassassin { cmd } => {
                Box::new(modules::spamassassin::SpamAssassin::new(
                    entry,
                    cmd.clone(),
                    config.default_user.clone(),
                    spool.clone(),
                    cache.clone(),
                ))
            }
            decency_config::ConfigFilterKind::Clamav { cmd } => {
                Box::new(modules::clamav::ClamAv::new(
                    entry,
                    cmd.clone(),
                    config.default_user.clone(),
                    spool.clone(),
                    cache.clone(),
                ))
            }
        });
    }
    Ok(chain)
}
