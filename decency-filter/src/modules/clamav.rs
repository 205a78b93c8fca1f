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
    cmd::{CmdFilter, CmdVariant},
    module::FilterModule,
    signal::{FilterResult, FilterSignal},
};
use decency_common::{queue_cache::QueueCache, session::MessageSession, spool::Spool};
use decency_config::{ConfigCmd, ConfigFilterModule};

/// clamav through clamscan/clamdscan: exit 1 plus a `... : <name> FOUND`
/// report line when the message carries a signature.
pub struct ClamAv {
    name: String,
    timeout: std::time::Duration,
    max_size: u64,
    cmd: CmdFilter,
}

impl ClamAv {
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
            cmd: CmdFilter::new(&entry.name, cmd, None, default_user, spool, cache),
        }
    }

    fn virus_label(header_block: &str) -> String {
        header_block
            .lines()
            .find_map(|line| {
                line.trim_end()
                    .strip_suffix("FOUND")
                    .and_then(|rest| rest.rsplit_once(':'))
                    .map(|(_, label)| label.trim().to_string())
            })
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

#[async_trait::async_trait]
impl FilterModule for ClamAv {
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

        match output.exit_code {
            0 => Ok(()),
            1 => Err(FilterSignal::Virus(Self::virus_label(&output.header_block))),
            code => Err(FilterSignal::Other(anyhow::anyhow!(
                "clamav scanner failed with exit code {}",
                code
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decency_common::address::Address;

    fn module_with(script: &str) -> (ClamAv, MessageSession) {
        let root = std::env::temp_dir().join(format!(
            "decency-clamav-test-{}",
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(8)
                .collect::<String>()
        ));
        std::fs::create_dir_all(&root).unwrap();
        let spool = Spool::open(&root).unwrap();
        let cache = QueueCache::new(
            root.join("cache"),
            decency_common::queue_cache::DEFAULT_TTL,
        )
        .unwrap();

        let (id, mut file) = spool.create_message().unwrap();
        std::io::Write::write_all(&mut file, b"From: a@x.org\n\nbody\n").unwrap();
        let session = MessageSession::new(
            spool.message_path(&id),
            Some(Address::try_from("a@x.org".to_string()).unwrap()),
            vec![],
        )
        .unwrap();

        let entry = decency_config::ConfigFilterModule {
            name: "clamav".to_string(),
            timeout: std::time::Duration::ZERO,
            max_size: 0,
            disable: false,
            disable_train: false,
            weight_spam: -100,
            weight_innocent: 10,
            kind: decency_config::ConfigFilterKind::Clamav {
                cmd: ConfigCmd {
                    command: "/bin/sh".into(),
                    args: vec!["-c".to_string(), script.to_string()],
                    pipe_file: true,
                    cmd_user: None,
                    cmd_learn_spam: None,
                    cmd_unlearn_spam: None,
                    cmd_learn_ham: None,
                    cmd_unlearn_ham: None,
                },
            },
        };
        let cmd = match &entry.kind {
            decency_config::ConfigFilterKind::Clamav { cmd } => cmd.clone(),
            _ => unreachable!(),
        };
        (ClamAv::new(&entry, cmd, None, spool, cache), session)
    }

    #[tokio::test]
    async fn clean_message_passes() {
        let (module, mut session) = module_with("printf 'stream: OK\\n'; exit 0");
        module.handle(&mut session).await.unwrap();
        assert!(session.virus.is_none());
    }

    #[tokio::test]
    async fn infected_message_raises_virus() {
        let (module, mut session) =
            module_with("printf 'stream: Eicar-Test-Signature FOUND\\n'; exit 1");
        match module.handle(&mut session).await {
            Err(FilterSignal::Virus(label)) => assert_eq!(label, "Eicar-Test-Signature"),
            other => panic!("expected a virus signal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scanner_breakage_is_an_error() {
        let (module, mut session) = module_with("exit 2");
        assert!(matches!(
            module.handle(&mut session).await,
            Err(FilterSignal::Other(_))
        ));
    }
}
