use crate::{Config, ConfigFilterKind, SpamBehavior, SpamHandle, VirusHandle};
use pretty_assertions::assert_eq;

const MINIMAL: &str = r#"
version_requirement = ">=0.1.0"
"#;

const FULL: &str = r#"
version_requirement = ">=0.1.0"

[server]
domain = "filter.example.org"

[server.interfaces]
addr = ["127.0.0.1:10030"]

[server.spool]
dirpath = "/var/spool/decency"

[filter.spam]
behavior = "scoring"
threshold = -150
handle = "tag"
subject_prefix = "[SPAM] "
noisy_headers = true

[filter.virus]
handle = "quarantine"

[filter.scoring]
accept_scoring = true
verify_key = "/etc/decency/policy.der"

[[filter.modules]]
name = "dspam"
type = "dspam"
timeout = "30s"
max_size = 4194304
weight_spam = -100
weight_innocent = 25
cmd = { command = "/usr/bin/dspam", args = ["--user", "%user%", "--classify", "--stdout"] }

[[filter.modules]]
name = "clamav"
type = "clamav"
timeout = "1m"
cmd = { command = "/usr/bin/clamdscan", args = ["--no-summary", "%file%"], pipe_file = true }

[cache]
dirpath = "/var/cache/decency"

[reinject]
host = "127.0.0.1"
port = 10031
"#;

#[test]
fn minimal_config_uses_defaults() {
    let config = Config::from_toml(MINIMAL).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.filter.spam.behavior, SpamBehavior::Scoring);
    assert_eq!(config.filter.virus.handle, VirusHandle::Quarantine);
    assert_eq!(config.cache.ttl, std::time::Duration::from_secs(600));
}

#[test]
fn full_config_parses() {
    let config = Config::from_toml(FULL).unwrap();

    assert_eq!(config.server.domain, "filter.example.org");
    assert_eq!(config.filter.spam.threshold, -150);
    assert_eq!(config.filter.spam.handle, SpamHandle::Tag);
    assert!(config.filter.spam.noisy_headers);
    assert!(config.filter.scoring.accept_scoring);

    assert_eq!(config.filter.modules.len(), 2);
    let dspam = &config.filter.modules[0];
    assert_eq!(dspam.name, "dspam");
    assert_eq!(dspam.timeout, std::time::Duration::from_secs(30));
    assert_eq!(dspam.max_size, 4_194_304);
    assert_eq!(dspam.weight_innocent, 25);
    match &dspam.kind {
        ConfigFilterKind::Dspam { cmd } => {
            assert_eq!(cmd.args[1], "%user%");
            assert!(!cmd.pipe_file);
        }
        other => panic!("expected a dspam module, got {other:?}"),
    }

    match &config.filter.modules[1].kind {
        ConfigFilterKind::Clamav { cmd } => assert!(cmd.pipe_file),
        other => panic!("expected a clamav module, got {other:?}"),
    }
}

#[test]
fn module_order_is_declaration_order() {
    let config = Config::from_toml(FULL).unwrap();
    assert_eq!(
        config
            .filter
            .modules
            .iter()
            .map(|m| m.name.as_str())
            .collect::<Vec<_>>(),
        ["dspam", "clamav"]
    );
}

#[test]
fn unknown_fields_are_rejected() {
    assert!(Config::from_toml(concat!(
        "version_requirement = \">=0.1.0\"\n",
        "[server]\n",
        "no_such_field = true\n"
    ))
    .is_err());
}

#[test]
fn version_gate() {
    assert!(Config::from_toml("version_requirement = \">=99.0.0\"").is_err());
    assert!(Config::from_toml("").is_err());
}
