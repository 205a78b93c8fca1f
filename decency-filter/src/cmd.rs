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
use decency_common::{
    queue_cache::QueueCache,
    session::MessageSession,
    spool::{Spool, SpoolArea},
};
use decency_config::{log_channel::FILTER, ConfigCmd};

/// which of a module's command templates to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdVariant {
    /// the scanning command.
    Classify,
    /// teach a missed spam.
    LearnSpam,
    /// revert a spam lesson.
    UnlearnSpam,
    /// teach a false positive.
    LearnHam,
    /// revert a ham lesson.
    UnlearnHam,
}

/// what the external program produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutput {
    /// merged stdout+stderr up to the first blank line.
    pub header_block: String,
    /// raw exit code, -1 when the process died on a signal.
    pub exit_code: i32,
}

/// Shared plumbing for modules that delegate classification to an external
/// program (dspam, bogofilter, spamc, clamscan, ...).
///
/// Placeholders `%user%` and `%file%` are substituted at the argv level;
/// nothing is ever interpolated through a shell.
pub struct CmdFilter {
    module: String,
    cmd: ConfigCmd,
    /// module-declared `%user%` fallback, tried after `cmd_user`.
    fallback_user: Option<String>,
    /// configured last-resort user.
    default_user: Option<String>,
    spool: Spool,
    cache: QueueCache,
}

impl CmdFilter {
    /// wire the helper to a module configuration.
    #[must_use]
    pub fn new(
        module: &str,
        cmd: ConfigCmd,
        fallback_user: Option<String>,
        default_user: Option<String>,
        spool: Spool,
        cache: QueueCache,
    ) -> Self {
        Self {
            module: module.to_string(),
            cmd,
            fallback_user,
            default_user,
            spool,
            cache,
        }
    }

    /// is the given training variant configured?
    #[must_use]
    pub const fn has_variant(&self, variant: CmdVariant) -> bool {
        match variant {
            CmdVariant::Classify => true,
            CmdVariant::LearnSpam => self.cmd.cmd_learn_spam.is_some(),
            CmdVariant::UnlearnSpam => self.cmd.cmd_unlearn_spam.is_some(),
            CmdVariant::LearnHam => self.cmd.cmd_learn_ham.is_some(),
            CmdVariant::UnlearnHam => self.cmd.cmd_unlearn_ham.is_some(),
        }
    }

    fn argv_template(&self, variant: CmdVariant) -> anyhow::Result<Vec<String>> {
        let training = |argv: &Option<Vec<String>>, which: &str| {
            argv.clone().ok_or_else(|| {
                anyhow::anyhow!("module '{}' has no {} command configured", self.module, which)
            })
        };
        match variant {
            CmdVariant::Classify => {
                let mut argv = vec![self.cmd.command.display().to_string()];
                argv.extend(self.cmd.args.iter().cloned());
                Ok(argv)
            }
            CmdVariant::LearnSpam => training(&self.cmd.cmd_learn_spam, "learn-spam"),
            CmdVariant::UnlearnSpam => training(&self.cmd.cmd_unlearn_spam, "unlearn-spam"),
            CmdVariant::LearnHam => training(&self.cmd.cmd_learn_ham, "learn-ham"),
            CmdVariant::UnlearnHam => training(&self.cmd.cmd_unlearn_ham, "unlearn-ham"),
        }
    }

    /// resolve the `%user%` placeholder for this message.
    ///
    /// order: the `cmd_user` program (fed the recipient on stdin, result
    /// cached per-recipient), the module fallback, the configured default,
    /// the envelope recipient itself.
    async fn resolve_user(&self, session: &MessageSession) -> anyhow::Result<Option<String>> {
        let recipient = session.to.first().map(ToString::to_string);

        if let (Some(cmd_user), Some(recipient)) = (&self.cmd.cmd_user, &recipient) {
            let key = QueueCache::user_key(recipient);
            if let Some(cached) = self.cache.get::<String>(&key)? {
                return Ok(Some(cached));
            }

            let output = tokio::process::Command::new(cmd_user)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("cannot spawn cmd_user {}", cmd_user.display()))?;

            let resolved = feed_and_collect(output, recipient.as_bytes()).await?;
            let resolved = resolved.lines().next().unwrap_or("").trim().to_string();
            if !resolved.is_empty() {
                self.cache.set(&key, &resolved)?;
                return Ok(Some(resolved));
            }
            log::warn!(
                target: FILTER,
                "module '{}': cmd_user produced nothing for '{}'",
                self.module,
                recipient
            );
        }

        Ok(self
            .fallback_user
            .clone()
            .or_else(|| self.default_user.clone())
            .or(recipient))
    }

    /// run one command template over the message.
    ///
    /// stdout and stderr are merged into a single scratch file; the caller
    /// gets the content up to the first blank line plus the raw exit code.
    ///
    /// # Errors
    ///
    /// * a placeholder cannot be resolved
    /// * the program cannot be spawned or its output not captured
    pub async fn execute(
        &self,
        session: &mut MessageSession,
        variant: CmdVariant,
    ) -> anyhow::Result<CmdOutput> {
        let template = self.argv_template(variant)?;
        let needs_user = template.iter().any(|arg| arg.contains("%user%"));
        let needs_file = self.cmd.pipe_file || template.iter().any(|arg| arg.contains("%file%"));

        let user = if needs_user {
            match self.resolve_user(session).await? {
                Some(user) => user,
                None => anyhow::bail!(
                    "module '{}' needs %user% but no resolution step produced one",
                    self.module
                ),
            }
        } else {
            String::new()
        };

        let content = session.wire_content()?;
        let message_file = if needs_file {
            let path = self.spool.area(SpoolArea::Mime).join(format!(
                "msg-{}",
                std::iter::repeat_with(fastrand::alphanumeric)
                    .take(6)
                    .collect::<String>()
            ));
            std::fs::write(&path, &content)
                .with_context(|| format!("cannot write message copy {}", path.display()))?;
            Some(path)
        } else {
            None
        };

        let argv = template
            .iter()
            .map(|arg| {
                arg.replace("%user%", &user).replace(
                    "%file%",
                    &message_file
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                )
            })
            .collect::<Vec<_>>();

        let scratch = self.spool.scratch_path(&self.module);
        let capture = std::fs::File::create(&scratch)
            .with_context(|| format!("cannot create scratch file {}", scratch.display()))?;

        log::debug!(target: FILTER, "module '{}' exec {:?}", self.module, argv);

        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdout(std::process::Stdio::from(capture.try_clone().context(
                "cannot duplicate the scratch handle for stderr capture",
            )?))
            .stderr(std::process::Stdio::from(capture))
            .stdin(if self.cmd.pipe_file {
                std::process::Stdio::null()
            } else {
                std::process::Stdio::piped()
            })
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("cannot spawn '{}'", argv[0]))?;

        if !self.cmd.pipe_file {
            if let Some(mut stdin) = child.stdin.take() {
                // a scanner may close stdin once it has seen enough;
                // the verdict still comes from the exit code.
                if let Err(e) = tokio::io::AsyncWriteExt::write_all(&mut stdin, content.as_bytes())
                    .await
                {
                    log::debug!(
                        target: FILTER,
                        "module '{}': short write to scanner stdin: {}",
                        self.module,
                        e
                    );
                }
            }
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("cannot wait for '{}'", argv[0]))?;

        let raw = std::fs::read_to_string(&scratch).unwrap_or_default();
        let header_block = raw
            .split("\n\n")
            .next()
            .unwrap_or("")
            .trim_end()
            .to_string();

        let _ = std::fs::remove_file(&scratch);
        if let Some(message_file) = message_file {
            let _ = std::fs::remove_file(message_file);
        }

        Ok(CmdOutput {
            header_block,
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

/// write `input` to the child's stdin, then collect its stdout.
async fn feed_and_collect(
    mut child: tokio::process::Child,
    input: &[u8],
) -> anyhow::Result<String> {
    if let Some(mut stdin) = child.stdin.take() {
        tokio::io::AsyncWriteExt::write_all(&mut stdin, input)
            .await
            .context("cannot feed the resolver program")?;
    }
    let output = child
        .wait_with_output()
        .await
        .context("cannot collect the resolver output")?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use decency_common::address::Address;

    fn workbench() -> (Spool, QueueCache, std::path::PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "decency-cmd-test-{}",
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
        (spool, cache, root)
    }

    fn session_on(spool: &Spool) -> MessageSession {
        let (id, mut file) = spool.create_message().unwrap();
        std::io::Write::write_all(&mut file, b"From: a@x.org\nSubject: t\n\nbody\n").unwrap();
        MessageSession::new(
            spool.message_path(&id),
            Some(Address::try_from("a@x.org".to_string()).unwrap()),
            vec![Address::try_from("b@y.org".to_string()).unwrap()],
        )
        .unwrap()
    }

    fn filter(cmd: ConfigCmd, spool: &Spool, cache: &QueueCache) -> CmdFilter {
        CmdFilter::new("test", cmd, None, None, spool.clone(), cache.clone())
    }

    #[tokio::test]
    async fn header_block_and_exit_code() {
        let (spool, cache, _root) = workbench();
        let mut session = session_on(&spool);

        let cmd = ConfigCmd {
            command: "/bin/sh".into(),
            args: vec![
                "-c".to_string(),
                "printf 'X-Result: spam\\nX-Score: 12\\n\\nbody noise\\n'; exit 3".to_string(),
            ],
            pipe_file: true,
            cmd_user: None,
            cmd_learn_spam: None,
            cmd_unlearn_spam: None,
            cmd_learn_ham: None,
            cmd_unlearn_ham: None,
        };

        let out = filter(cmd, &spool, &cache)
            .execute(&mut session, CmdVariant::Classify)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.header_block, "X-Result: spam\nX-Score: 12");
    }

    #[tokio::test]
    async fn message_is_piped_on_stdin() {
        let (spool, cache, _root) = workbench();
        let mut session = session_on(&spool);

        let cmd = ConfigCmd {
            command: "/bin/cat".into(),
            args: vec![],
            pipe_file: false,
            cmd_user: None,
            cmd_learn_spam: None,
            cmd_unlearn_spam: None,
            cmd_learn_ham: None,
            cmd_unlearn_ham: None,
        };

        let out = filter(cmd, &spool, &cache)
            .execute(&mut session, CmdVariant::Classify)
            .await
            .unwrap();
        // cat echoes the message; the capture stops at the header/body split.
        assert_eq!(out.header_block, "From: a@x.org\nSubject: t");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn file_placeholder_is_substituted() {
        let (spool, cache, _root) = workbench();
        let mut session = session_on(&spool);

        let cmd = ConfigCmd {
            command: "/bin/cat".into(),
            args: vec!["%file%".to_string()],
            pipe_file: true,
            cmd_user: None,
            cmd_learn_spam: None,
            cmd_unlearn_spam: None,
            cmd_learn_ham: None,
            cmd_unlearn_ham: None,
        };

        let out = filter(cmd, &spool, &cache)
            .execute(&mut session, CmdVariant::Classify)
            .await
            .unwrap();
        assert_eq!(out.header_block, "From: a@x.org\nSubject: t");
    }

    #[tokio::test]
    async fn user_resolution_runs_cmd_user_and_caches() {
        let (spool, cache, _root) = workbench();
        let mut session = session_on(&spool);

        let cmd = ConfigCmd {
            command: "/bin/sh".into(),
            args: vec!["-c".to_string(), "printf 'user=%s' '%user%'".to_string()],
            pipe_file: true,
            // cat echoes the recipient back: the resolved user is b@y.org.
            cmd_user: Some("/bin/cat".into()),
            cmd_learn_spam: None,
            cmd_unlearn_spam: None,
            cmd_learn_ham: None,
            cmd_unlearn_ham: None,
        };

        let out = filter(cmd, &spool, &cache)
            .execute(&mut session, CmdVariant::Classify)
            .await
            .unwrap();
        assert_eq!(out.header_block, "user=b@y.org");

        assert_eq!(
            cache
                .get::<String>(&QueueCache::user_key("b@y.org"))
                .unwrap()
                .as_deref(),
            Some("b@y.org")
        );
    }

    #[tokio::test]
    async fn missing_training_command_is_an_error() {
        let (spool, cache, _root) = workbench();
        let mut session = session_on(&spool);

        let cmd = ConfigCmd {
            command: "/bin/true".into(),
            args: vec![],
            pipe_file: true,
            cmd_user: None,
            cmd_learn_spam: None,
            cmd_unlearn_spam: None,
            cmd_learn_ham: None,
            cmd_unlearn_ham: None,
        };

        assert!(filter(cmd, &spool, &cache)
            .execute(&mut session, CmdVariant::LearnSpam)
            .await
            .is_err());
    }
}
