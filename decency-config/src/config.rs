#![allow(clippy::module_name_repetitions)]
#![allow(missing_docs)]
use decency_common::code::SmtpReplyCode;

///
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(
        serialize_with = "crate::parser::semver::serialize",
        deserialize_with = "crate::parser::semver::deserialize"
    )]
    pub version_requirement: semver::VersionReq,
    #[serde(default)]
    pub server: ConfigServer,
    #[serde(default)]
    pub filter: ConfigFilter,
    #[serde(default)]
    pub cache: ConfigCache,
    #[serde(default)]
    pub reinject: ConfigReinject,
    #[serde(default)]
    pub stats: ConfigStats,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServer {
    #[serde(default = "ConfigServer::hostname")]
    pub domain: String,
    #[serde(default = "ConfigServer::default_client_count_max")]
    pub client_count_max: i64,
    #[serde(default = "ConfigServer::default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub interfaces: ConfigServerInterfaces,
    #[serde(default)]
    pub logs: ConfigServerLogs,
    #[serde(default)]
    pub spool: ConfigServerSpool,
    #[serde(default)]
    pub smtp: ConfigServerSmtp,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerInterfaces {
    #[serde(deserialize_with = "crate::parser::socket_addr::deserialize")]
    pub addr: Vec<std::net::SocketAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerLogs {
    pub filepath: std::path::PathBuf,
    pub format: String,
    pub level: std::collections::BTreeMap<String, log::LevelFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSpool {
    pub dirpath: std::path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSmtpError {
    pub soft_count: i64,
    pub hard_count: i64,
    #[serde(with = "humantime_serde")]
    pub delay: std::time::Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSmtpTimeoutClient {
    #[serde(with = "humantime_serde")]
    pub connect: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub helo: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub mail_from: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub rcpt_to: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub data: std::time::Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigServerSmtp {
    #[serde(default = "ConfigServerSmtp::default_rcpt_count_max")]
    pub rcpt_count_max: usize,
    #[serde(default)]
    pub error: ConfigServerSmtpError,
    #[serde(default)]
    pub timeout_client: ConfigServerSmtpTimeoutClient,
    #[serde(default = "ConfigServerSmtp::default_codes")]
    pub codes: std::collections::BTreeMap<SmtpReplyCode, String>,
}

/// what the pipeline does with the accumulated score.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpamBehavior {
    /// run the modules but never classify on score.
    Ignore,
    /// any negative score terminates the run as spam.
    Strict,
    /// compare the cumulative score to `threshold`.
    Scoring,
}

/// what happens to a message once classified spam.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpamHandle {
    /// stamp headers / subject and re-inject.
    Tag,
    /// refuse with 5xx so the MTA bounces it.
    Bounce,
    /// swallow the message.
    Delete,
    /// re-inject unmodified.
    Ignore,
}

/// what happens to a message carrying a virus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VirusHandle {
    /// re-inject regardless.
    Ignore,
    /// refuse with 5xx.
    Bounce,
    /// swallow the message.
    Delete,
    /// copy to the quarantine area, then swallow.
    Quarantine,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigNotify {
    #[serde(default)]
    pub sender: bool,
    #[serde(default)]
    pub recipient: bool,
    #[serde(default)]
    pub template: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSpamPolicy {
    #[serde(default = "ConfigSpamPolicy::default_behavior")]
    pub behavior: SpamBehavior,
    #[serde(default = "ConfigSpamPolicy::default_threshold")]
    pub threshold: i64,
    #[serde(default = "ConfigSpamPolicy::default_handle")]
    pub handle: SpamHandle,
    #[serde(default = "ConfigSpamPolicy::default_subject_prefix")]
    pub subject_prefix: Option<String>,
    #[serde(default)]
    pub noisy_headers: bool,
    #[serde(default)]
    pub notify: ConfigNotify,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigVirusPolicy {
    #[serde(default = "ConfigVirusPolicy::default_handle")]
    pub handle: VirusHandle,
    #[serde(default)]
    pub notify: ConfigNotify,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigScoring {
    /// accept a scoring header injected by the policy server.
    #[serde(default)]
    pub accept_scoring: bool,
    /// DER encoded RSA public key matching the policy server's signing key.
    #[serde(default)]
    pub verify_key: Option<std::path::PathBuf>,
}

/// how an external scanner is invoked.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigCmd {
    /// the scanner executable.
    pub command: std::path::PathBuf,
    /// argv templates; `%user%` and `%file%` are substituted per argument,
    /// never through a shell.
    #[serde(default)]
    pub args: Vec<String>,
    /// hand the message over as a temp file (`%file%`) instead of stdin.
    #[serde(default)]
    pub pipe_file: bool,
    /// program resolving the scanner user for a recipient (fed on stdin).
    #[serde(default)]
    pub cmd_user: Option<std::path::PathBuf>,
    /// argv (program + args) teaching the scanner a missed spam.
    #[serde(default)]
    pub cmd_learn_spam: Option<Vec<String>>,
    /// argv reverting a spam lesson.
    #[serde(default)]
    pub cmd_unlearn_spam: Option<Vec<String>>,
    /// argv teaching the scanner a false positive.
    #[serde(default)]
    pub cmd_learn_ham: Option<Vec<String>>,
    /// argv reverting a ham lesson.
    #[serde(default)]
    pub cmd_unlearn_ham: Option<Vec<String>>,
}

/// the scanner behind a module; the tag selects the result parser.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConfigFilterKind {
    /// dspam; reads the X-DSPAM-* report headers.
    Dspam { cmd: ConfigCmd },
    /// bogofilter; classification is in the exit code.
    Bogofilter { cmd: ConfigCmd },
    /// spamassassin (spamc); reads the score/threshold report line.
    Spamassassin { cmd: ConfigCmd },
    /// clamav (clamscan/clamdscan); reads the FOUND report line.
    Clamav { cmd: ConfigCmd },
}

/// one entry of the ordered filter chain.
// NOTE: no deny_unknown_fields here: serde cannot combine it with flatten.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ConfigFilterModule {
    pub name: String,
    /// per-run deadline; zero means unbounded.
    #[serde(default, with = "humantime_serde")]
    pub timeout: std::time::Duration,
    /// skip messages larger than this; zero means no limit.
    #[serde(default)]
    pub max_size: u64,
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub disable_train: bool,
    /// score delta applied when the scanner says spam.
    #[serde(default = "ConfigFilterModule::default_weight_spam")]
    pub weight_spam: i64,
    /// score delta applied when the scanner says innocent.
    #[serde(default = "ConfigFilterModule::default_weight_innocent")]
    pub weight_innocent: i64,
    #[serde(flatten)]
    pub kind: ConfigFilterKind,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFilter {
    /// the chain, executed in declaration order.
    #[serde(default)]
    pub modules: Vec<ConfigFilterModule>,
    #[serde(default)]
    pub spam: ConfigSpamPolicy,
    #[serde(default)]
    pub virus: ConfigVirusPolicy,
    #[serde(default)]
    pub scoring: ConfigScoring,
    /// last-resort `%user%` value when no resolution step produced one.
    #[serde(default)]
    pub default_user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigCache {
    pub dirpath: std::path::PathBuf,
    #[serde(default = "ConfigCache::default_ttl", with = "humantime_serde")]
    pub ttl: std::time::Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigReinject {
    /// the downstream listener messages are re-submitted to.
    pub host: String,
    pub port: u16,
    /// name presented in the client HELO.
    #[serde(default = "ConfigReinject::default_helo")]
    pub helo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigStats {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "ConfigStats::default_filepath")]
    pub filepath: std::path::PathBuf,
    #[serde(default = "ConfigStats::default_flush_interval", with = "humantime_serde")]
    pub flush_interval: std::time::Duration,
}
