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
use crate::config::{
    Config, ConfigCache, ConfigFilter, ConfigFilterModule, ConfigNotify, ConfigReinject,
    ConfigScoring, ConfigServer, ConfigServerInterfaces, ConfigServerLogs, ConfigServerSmtp,
    ConfigServerSmtpError, ConfigServerSmtpTimeoutClient, ConfigServerSpool, ConfigSpamPolicy,
    ConfigStats, ConfigVirusPolicy, SpamBehavior, SpamHandle, VirusHandle,
};
use decency_common::code::SmtpReplyCode;

impl Default for Config {
    fn default() -> Self {
        Self {
            version_requirement: semver::VersionReq::parse(">=0.1.0").expect("valid range"),
            server: ConfigServer::default(),
            filter: ConfigFilter::default(),
            cache: ConfigCache::default(),
            reinject: ConfigReinject::default(),
            stats: ConfigStats::default(),
        }
    }
}

impl Default for ConfigServer {
    fn default() -> Self {
        Self {
            domain: Self::hostname(),
            client_count_max: Self::default_client_count_max(),
            worker_count: Self::default_worker_count(),
            interfaces: ConfigServerInterfaces::default(),
            logs: ConfigServerLogs::default(),
            spool: ConfigServerSpool::default(),
            smtp: ConfigServerSmtp::default(),
        }
    }
}

impl ConfigServer {
    pub(crate) fn hostname() -> String {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
    }

    pub(crate) const fn default_client_count_max() -> i64 {
        -1
    }

    pub(crate) fn default_worker_count() -> usize {
        num_cpus::get()
    }
}

impl Default for ConfigServerInterfaces {
    fn default() -> Self {
        Self {
            // the MTA forwards to a loopback port; never exposed publicly.
            addr: vec!["127.0.0.1:10030".parse().expect("valid address")],
        }
    }
}

impl Default for ConfigServerLogs {
    fn default() -> Self {
        Self {
            filepath: std::path::PathBuf::from_iter(["/", "var", "log", "decency", "filter.log"]),
            format: "{d} {l} - {m}{n}".to_string(),
            level: std::collections::BTreeMap::default(),
        }
    }
}

impl Default for ConfigServerSpool {
    fn default() -> Self {
        Self {
            dirpath: std::path::PathBuf::from_iter(["/", "var", "spool", "decency"]),
        }
    }
}

impl Default for ConfigServerSmtpError {
    fn default() -> Self {
        Self {
            soft_count: 5,
            hard_count: 10,
            delay: std::time::Duration::from_millis(1000),
        }
    }
}

impl Default for ConfigServerSmtpTimeoutClient {
    fn default() -> Self {
        Self {
            connect: std::time::Duration::from_secs(5 * 60),
            helo: std::time::Duration::from_secs(5 * 60),
            mail_from: std::time::Duration::from_secs(5 * 60),
            rcpt_to: std::time::Duration::from_secs(5 * 60),
            data: std::time::Duration::from_secs(10 * 60),
        }
    }
}

impl Default for ConfigServerSmtp {
    fn default() -> Self {
        Self {
            rcpt_count_max: Self::default_rcpt_count_max(),
            error: ConfigServerSmtpError::default(),
            timeout_client: ConfigServerSmtpTimeoutClient::default(),
            codes: Self::default_codes(),
        }
    }
}

impl ConfigServerSmtp {
    pub(crate) const fn default_rcpt_count_max() -> usize {
        1000
    }

    pub(crate) fn default_codes() -> std::collections::BTreeMap<SmtpReplyCode, String> {
        [
            (
                SmtpReplyCode::Greetings,
                "220 {domain} decency service ready\r\n",
            ),
            (
                SmtpReplyCode::Code221,
                "221 Service closing transmission channel\r\n",
            ),
            (SmtpReplyCode::Code250, "250 Ok\r\n"),
            (SmtpReplyCode::Code250Esmtp, "250-{domain}\r\n250 8BITMIME\r\n"),
            (
                SmtpReplyCode::Code354,
                "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
            ),
            (
                SmtpReplyCode::Code451Timeout,
                "451 Timeout - closing connection.\r\n",
            ),
            (
                SmtpReplyCode::Code451TooManyError,
                "451 Too many errors from the client\r\n",
            ),
            (
                SmtpReplyCode::Code452TooManyRecipients,
                "452 Requested action not taken: too many recipients\r\n",
            ),
            (
                SmtpReplyCode::Code500,
                "500 Syntax error command unrecognized\r\n",
            ),
            (
                SmtpReplyCode::Code501,
                "501 Syntax error in parameters or arguments\r\n",
            ),
            (SmtpReplyCode::Code502, "502 Command not implemented\r\n"),
            (SmtpReplyCode::Code503, "503 Bad sequence of commands\r\n"),
            (SmtpReplyCode::Code550, "550 message refused\r\n"),
            (
                SmtpReplyCode::Code554,
                "554 permanent problems with the remote server\r\n",
            ),
            (
                SmtpReplyCode::Help,
                "214 supported: HELO EHLO MAIL RCPT DATA RSET NOOP QUIT\r\n",
            ),
        ]
        .into_iter()
        .map(|(code, text)| (code, text.to_string()))
        .collect()
    }
}

impl Default for ConfigSpamPolicy {
    fn default() -> Self {
        Self {
            behavior: Self::default_behavior(),
            threshold: Self::default_threshold(),
            handle: Self::default_handle(),
            subject_prefix: Self::default_subject_prefix(),
            noisy_headers: false,
            notify: ConfigNotify::default(),
        }
    }
}

impl ConfigSpamPolicy {
    pub(crate) const fn default_behavior() -> SpamBehavior {
        SpamBehavior::Scoring
    }

    pub(crate) const fn default_threshold() -> i64 {
        -100
    }

    pub(crate) const fn default_handle() -> SpamHandle {
        SpamHandle::Tag
    }

    pub(crate) fn default_subject_prefix() -> Option<String> {
        Some("[SPAM] ".to_string())
    }
}

impl Default for ConfigVirusPolicy {
    fn default() -> Self {
        Self {
            handle: Self::default_handle(),
            notify: ConfigNotify::default(),
        }
    }
}

impl ConfigVirusPolicy {
    pub(crate) const fn default_handle() -> VirusHandle {
        VirusHandle::Quarantine
    }
}

impl Default for ConfigNotify {
    fn default() -> Self {
        Self {
            sender: false,
            recipient: false,
            template: None,
        }
    }
}

impl Default for ConfigFilter {
    fn default() -> Self {
        Self {
            modules: vec![],
            spam: ConfigSpamPolicy::default(),
            virus: ConfigVirusPolicy::default(),
            scoring: ConfigScoring::default(),
            default_user: None,
        }
    }
}

impl Default for ConfigScoring {
    fn default() -> Self {
        Self {
            accept_scoring: false,
            verify_key: None,
        }
    }
}

impl ConfigFilterModule {
    pub(crate) const fn default_weight_spam() -> i64 {
        -100
    }

    pub(crate) const fn default_weight_innocent() -> i64 {
        10
    }
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self {
            dirpath: std::path::PathBuf::from_iter(["/", "var", "cache", "decency"]),
            ttl: Self::default_ttl(),
        }
    }
}

impl ConfigCache {
    pub(crate) const fn default_ttl() -> std::time::Duration {
        decency_common::queue_cache::DEFAULT_TTL
    }
}

impl Default for ConfigReinject {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 10031,
            helo: Self::default_helo(),
        }
    }
}

impl ConfigReinject {
    pub(crate) fn default_helo() -> String {
        ConfigServer::hostname()
    }
}

impl Default for ConfigStats {
    fn default() -> Self {
        Self {
            enable: false,
            filepath: Self::default_filepath(),
            flush_interval: Self::default_flush_interval(),
        }
    }
}

impl ConfigStats {
    pub(crate) fn default_filepath() -> std::path::PathBuf {
        std::path::PathBuf::from_iter(["/", "var", "lib", "decency", "stats.db"])
    }

    pub(crate) const fn default_flush_interval() -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }
}
