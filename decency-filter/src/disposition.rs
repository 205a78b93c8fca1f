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
use decency_common::{
    address::Address,
    mail::Mail,
    session::MessageSession,
    spool::Spool,
    status::{Disposition, FilterStatus},
};
use decency_config::{
    log_channel::FILTER, ConfigNotify, ConfigSpamPolicy, ConfigVirusPolicy, SpamHandle, VirusHandle,
};

/// pushes a message to the downstream listener; implemented by the server
/// crate's SMTP client.
#[async_trait::async_trait]
pub trait Reinject: Send + Sync {
    /// submit `content` for the given envelope; returns the queue-id the
    /// downstream assigned, when its reply carried one.
    async fn reinject(
        &self,
        from: &Option<Address>,
        to: &[Address],
        content: &str,
    ) -> anyhow::Result<Option<String>>;
}

/// Turns the terminal pipeline status into the final action on the message.
pub struct DispositionEngine {
    spam: ConfigSpamPolicy,
    virus: ConfigVirusPolicy,
    domain: String,
    spool: Spool,
    reinjector: Box<dyn Reinject>,
}

impl DispositionEngine {
    ///
    #[must_use]
    pub fn new(
        spam: ConfigSpamPolicy,
        virus: ConfigVirusPolicy,
        domain: String,
        spool: Spool,
        reinjector: Box<dyn Reinject>,
    ) -> Self {
        Self {
            spam,
            virus,
            domain,
            spool,
            reinjector,
        }
    }

    /// map `(status, policy)` onto the final code, carrying out the side
    /// effects (header stamping, quarantine copy, re-injection, notices).
    pub async fn dispose(
        &self,
        session: &mut MessageSession,
        status: FilterStatus,
    ) -> (Disposition, String) {
        match status {
            FilterStatus::Drop => {
                log::info!(target: FILTER, "message '{}' dropped by a module", session.id);
                (Disposition::Ok, "message dropped".to_string())
            }
            FilterStatus::Virus => self.dispose_virus(session).await,
            FilterStatus::Spam => self.dispose_spam(session).await,
            FilterStatus::Ok => self.dispose_ok(session).await,
        }
    }

    async fn dispose_ok(&self, session: &mut MessageSession) -> (Disposition, String) {
        if self.spam.noisy_headers {
            if let Err(e) = stamp(session, "GOOD", true) {
                log::error!(target: FILTER, "message '{}': cannot stamp headers: {}", session.id, e);
            }
        }
        self.reinject(session).await
    }

    async fn dispose_spam(&self, session: &mut MessageSession) -> (Disposition, String) {
        let detail = if session.spam_details.is_empty() {
            format!("spam score {}", session.spam_score)
        } else {
            session.spam_details.join(" | ")
        };

        match self.spam.handle {
            SpamHandle::Delete => {
                self.notify(session, &self.spam.notify.clone(), &detail).await;
                (Disposition::Deleted, detail)
            }
            SpamHandle::Bounce => (Disposition::Bounce, detail),
            SpamHandle::Ignore => self.reinject(session).await,
            SpamHandle::Tag => {
                if let Err(e) = stamp(session, "SPAM", self.spam.noisy_headers) {
                    log::error!(target: FILTER, "message '{}': cannot stamp headers: {}", session.id, e);
                }
                if let Some(prefix) = self.spam.subject_prefix.clone() {
                    match session.mail() {
                        Ok(mail) => mail.prefix_subject(&prefix),
                        Err(e) => {
                            log::error!(target: FILTER, "message '{}': cannot rewrite subject: {}", session.id, e);
                        }
                    }
                }
                self.reinject(session).await
            }
        }
    }

    async fn dispose_virus(&self, session: &mut MessageSession) -> (Disposition, String) {
        let label = session
            .virus
            .clone()
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let detail = format!("virus: {label}");

        let disposition = match self.virus.handle {
            VirusHandle::Ignore => return self.reinject(session).await,
            VirusHandle::Bounce => Disposition::Bounce,
            VirusHandle::Delete => Disposition::Deleted,
            VirusHandle::Quarantine => match self.spool.quarantine(session) {
                Ok(path) => {
                    log::info!(
                        target: FILTER,
                        "message '{}' quarantined as {}",
                        session.id,
                        path.display()
                    );
                    Disposition::Deleted
                }
                Err(e) => {
                    log::error!(target: FILTER, "message '{}': quarantine failed: {}", session.id, e);
                    return (Disposition::Error, format!("quarantine failed: {e}"));
                }
            },
        };

        self.notify(session, &self.virus.notify.clone(), &detail).await;
        (disposition, detail)
    }

    async fn reinject(&self, session: &mut MessageSession) -> (Disposition, String) {
        if session
            .flags
            .contains(decency_common::session::FLAG_NO_REINJECT)
        {
            log::info!(
                target: FILTER,
                "message '{}' held back by the {} flag",
                session.id,
                decency_common::session::FLAG_NO_REINJECT
            );
            return (Disposition::Deleted, "held back, not re-injected".to_string());
        }

        let content = match session.wire_content() {
            Ok(content) => content,
            Err(e) => return (Disposition::Error, format!("cannot read message: {e}")),
        };

        match self
            .reinjector
            .reinject(&session.from, &session.to, &content)
            .await
        {
            Ok(next_id) => {
                session.next_id = next_id;
                (Disposition::Ok, "re-injected".to_string())
            }
            Err(e) => {
                log::error!(target: FILTER, "message '{}': re-injection failed: {}", session.id, e);
                match self.spool.keep_failure(session) {
                    Ok(path) => log::warn!(
                        target: FILTER,
                        "message '{}' kept for manual recovery at {}",
                        session.id,
                        path.display()
                    ),
                    Err(keep) => log::error!(
                        target: FILTER,
                        "message '{}': could not even keep a failure copy: {}",
                        session.id,
                        keep
                    ),
                }
                (Disposition::Error, format!("re-injection failed: {e}"))
            }
        }
    }

    /// synthesize and submit the configured notices. failures only log;
    /// notification must never change the message's own disposition.
    async fn notify(&self, session: &mut MessageSession, notify: &ConfigNotify, reason: &str) {
        if !notify.sender && !notify.recipient {
            return;
        }
        let Some(template_path) = notify.template.as_ref() else {
            log::warn!(
                target: FILTER,
                "notification requested but no template configured, skipping"
            );
            return;
        };
        let template = match std::fs::read_to_string(template_path) {
            Ok(template) => template,
            Err(e) => {
                log::error!(
                    target: FILTER,
                    "cannot read notification template {}: {}",
                    template_path.display(),
                    e
                );
                return;
            }
        };

        let subject = session
            .mail()
            .ok()
            .and_then(|mail| mail.get_header("Subject").map(str::to_string))
            .unwrap_or_default();
        let from = session
            .from
            .as_ref()
            .map_or_else(|| "<>".to_string(), ToString::to_string);
        let to = session
            .to
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        let body = template
            .replace("%from%", &from)
            .replace("%to%", &to)
            .replace("%subject%", &subject)
            .replace("%reason%", reason);

        let Ok(postmaster) = Address::try_from(format!("postmaster@{}", self.domain)) else {
            log::error!(target: FILTER, "cannot build the postmaster address for '{}'", self.domain);
            return;
        };

        let mut targets = vec![];
        if notify.sender {
            targets.extend(session.from.iter().cloned());
        }
        if notify.recipient {
            targets.extend(session.to.iter().cloned());
        }

        for target in targets {
            let mut notice = Mail::default();
            notice.set_header("From", &postmaster.to_string());
            notice.set_header("To", &target.to_string());
            notice.set_header("Subject", "mail delivery notice");
            notice.set_header("Auto-Submitted", "auto-replied");
            notice.body = body.lines().map(str::to_string).collect();

            if let Err(e) = self
                .reinjector
                .reinject(
                    &Some(postmaster.clone()),
                    &[target.clone()],
                    &notice.to_raw(),
                )
                .await
            {
                log::error!(
                    target: FILTER,
                    "cannot submit the notice for '{}': {}",
                    target,
                    e
                );
            }
        }
    }
}

/// stamp the decision headers; the per-module rationale only with
/// noisy headers on.
fn stamp(session: &mut MessageSession, result: &str, noisy: bool) -> anyhow::Result<()> {
    let score = session.spam_score;
    let details = session.spam_details.join("|");
    let mail = session.mail()?;

    mail.set_header("X-Decency-Result", result);
    mail.set_header("X-Decency-Score", &score.to_string());
    if noisy && !details.is_empty() {
        mail.set_header("X-Decency-SpamInfo", &details);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use decency_config::{ConfigNotify, SpamBehavior};

    /// remembers every submission; optionally refuses them all.
    struct MockReinjector {
        refuse: bool,
        submissions: std::sync::Mutex<Vec<String>>,
    }

    impl MockReinjector {
        fn new(refuse: bool) -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self {
                refuse,
                submissions: std::sync::Mutex::new(vec![]),
            })
        }
    }

    #[async_trait::async_trait]
    impl Reinject for std::sync::Arc<MockReinjector> {
        async fn reinject(
            &self,
            _: &Option<Address>,
            _: &[Address],
            content: &str,
        ) -> anyhow::Result<Option<String>> {
            if self.refuse {
                anyhow::bail!("connection refused")
            }
            self.submissions.lock().unwrap().push(content.to_string());
            Ok(Some("NEXT123".to_string()))
        }
    }

    fn workbench(
        spam: ConfigSpamPolicy,
        virus: ConfigVirusPolicy,
        refuse: bool,
    ) -> (DispositionEngine, std::sync::Arc<MockReinjector>, Spool) {
        let root = std::env::temp_dir().join(format!(
            "decency-dispo-test-{}",
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(8)
                .collect::<String>()
        ));
        std::fs::create_dir_all(&root).unwrap();
        let spool = Spool::open(&root).unwrap();
        let reinjector = MockReinjector::new(refuse);
        let engine = DispositionEngine::new(
            spam,
            virus,
            "filter.example.org".to_string(),
            spool.clone(),
            Box::new(reinjector.clone()),
        );
        (engine, reinjector, spool)
    }

    fn session_on(spool: &Spool) -> MessageSession {
        let (id, mut file) = spool.create_message().unwrap();
        std::io::Write::write_all(&mut file, b"From: a@x.org\nSubject: hi\n\nbody\n").unwrap();
        MessageSession::new(
            spool.message_path(&id),
            Some(Address::try_from("a@x.org".to_string()).unwrap()),
            vec![Address::try_from("b@y.org".to_string()).unwrap()],
        )
        .unwrap()
    }

    fn spam_policy(handle: SpamHandle, noisy: bool) -> ConfigSpamPolicy {
        ConfigSpamPolicy {
            behavior: SpamBehavior::Scoring,
            threshold: -100,
            handle,
            subject_prefix: Some("[SPAM] ".to_string()),
            noisy_headers: noisy,
            notify: ConfigNotify::default(),
        }
    }

    fn virus_policy(handle: VirusHandle) -> ConfigVirusPolicy {
        ConfigVirusPolicy {
            handle,
            notify: ConfigNotify::default(),
        }
    }

    #[tokio::test]
    async fn tagged_spam_is_reinjected_with_headers() {
        let (engine, reinjector, spool) = workbench(
            spam_policy(SpamHandle::Tag, true),
            virus_policy(VirusHandle::Quarantine),
            false,
        );
        let mut session = session_on(&spool);
        session.add_score(-60, "m1: -60".to_string());
        session.add_score(-100, "m2: -100".to_string());

        let (disposition, _) = engine.dispose(&mut session, FilterStatus::Spam).await;
        assert_eq!(disposition, Disposition::Ok);
        assert_eq!(session.next_id.as_deref(), Some("NEXT123"));

        let submissions = reinjector.submissions.lock().unwrap();
        assert!(submissions[0].contains("X-Decency-Result: SPAM"));
        assert!(submissions[0].contains("X-Decency-Score: -160"));
        assert!(submissions[0].contains("X-Decency-SpamInfo: m1: -60|m2: -100"));
        assert!(submissions[0].contains("Subject: [SPAM] hi"));
    }

    #[tokio::test]
    async fn quarantined_virus_never_reaches_downstream() {
        let (engine, reinjector, spool) = workbench(
            spam_policy(SpamHandle::Tag, false),
            virus_policy(VirusHandle::Quarantine),
            false,
        );
        let mut session = session_on(&spool);
        session.virus = Some("Eicar-Test".to_string());

        let (disposition, detail) = engine.dispose(&mut session, FilterStatus::Virus).await;
        assert_eq!(disposition, Disposition::Deleted);
        assert_eq!(detail, "virus: Eicar-Test");
        assert!(reinjector.submissions.lock().unwrap().is_empty());

        let quarantined =
            std::fs::read_dir(spool.area(decency_common::spool::SpoolArea::Quarantine))
                .unwrap()
                .count();
        assert_eq!(quarantined, 1);
    }

    #[tokio::test]
    async fn virus_bounce_and_delete() {
        for (handle, expected) in [
            (VirusHandle::Bounce, Disposition::Bounce),
            (VirusHandle::Delete, Disposition::Deleted),
        ] {
            let (engine, _, spool) = workbench(
                spam_policy(SpamHandle::Tag, false),
                virus_policy(handle),
                false,
            );
            let mut session = session_on(&spool);
            session.virus = Some("X".to_string());
            let (disposition, _) = engine.dispose(&mut session, FilterStatus::Virus).await;
            assert_eq!(disposition, expected);
        }
    }

    #[tokio::test]
    async fn reinject_failure_keeps_a_copy_and_errors() {
        let (engine, _, spool) = workbench(
            spam_policy(SpamHandle::Tag, false),
            virus_policy(VirusHandle::Quarantine),
            true,
        );
        let mut session = session_on(&spool);

        let (disposition, detail) = engine.dispose(&mut session, FilterStatus::Ok).await;
        assert_eq!(disposition, Disposition::Error);
        assert!(detail.contains("re-injection failed"));
        assert!(spool
            .area(decency_common::spool::SpoolArea::Failure)
            .join(&session.id)
            .exists());
    }

    #[tokio::test]
    async fn clean_mail_is_quiet_without_noisy_headers() {
        let (engine, reinjector, spool) = workbench(
            spam_policy(SpamHandle::Tag, false),
            virus_policy(VirusHandle::Quarantine),
            false,
        );
        let mut session = session_on(&spool);

        let (disposition, _) = engine.dispose(&mut session, FilterStatus::Ok).await;
        assert_eq!(disposition, Disposition::Ok);
        assert!(!reinjector.submissions.lock().unwrap()[0].contains("X-Decency-Result"));
    }

    #[tokio::test]
    async fn clean_mail_is_stamped_good_when_noisy() {
        let (engine, reinjector, spool) = workbench(
            spam_policy(SpamHandle::Tag, true),
            virus_policy(VirusHandle::Quarantine),
            false,
        );
        let mut session = session_on(&spool);

        engine.dispose(&mut session, FilterStatus::Ok).await;
        assert!(reinjector.submissions.lock().unwrap()[0].contains("X-Decency-Result: GOOD"));
    }

    #[tokio::test]
    async fn no_reinject_flag_holds_the_message() {
        let (engine, reinjector, spool) = workbench(
            spam_policy(SpamHandle::Tag, false),
            virus_policy(VirusHandle::Quarantine),
            false,
        );
        let mut session = session_on(&spool);
        session
            .flags
            .insert(decency_common::session::FLAG_NO_REINJECT.to_string());

        let (disposition, _) = engine.dispose(&mut session, FilterStatus::Ok).await;
        assert_eq!(disposition, Disposition::Deleted);
        assert!(
            reinjector.submissions.lock().unwrap().is_empty(),
            "a flagged message never reaches the downstream listener"
        );
    }

    #[tokio::test]
    async fn dropped_mail_is_swallowed() {
        let (engine, reinjector, spool) = workbench(
            spam_policy(SpamHandle::Tag, false),
            virus_policy(VirusHandle::Quarantine),
            false,
        );
        let mut session = session_on(&spool);

        let (disposition, _) = engine.dispose(&mut session, FilterStatus::Drop).await;
        assert_eq!(disposition, Disposition::Ok);
        assert!(reinjector.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn spam_delete_notifies_recipient_via_template() {
        let template = std::env::temp_dir().join(format!(
            "decency-notify-template-{}",
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(8)
                .collect::<String>()
        ));
        std::fs::write(
            &template,
            "Your message '%subject%' from %from% was removed: %reason%\n",
        )
        .unwrap();

        let mut spam = spam_policy(SpamHandle::Delete, false);
        spam.notify = ConfigNotify {
            sender: false,
            recipient: true,
            template: Some(template),
        };
        let (engine, reinjector, spool) =
            workbench(spam, virus_policy(VirusHandle::Quarantine), false);
        let mut session = session_on(&spool);
        session.add_score(-200, "m1: -200".to_string());

        let (disposition, _) = engine.dispose(&mut session, FilterStatus::Spam).await;
        assert_eq!(disposition, Disposition::Deleted);

        let submissions = reinjector.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1, "only the notice is submitted");
        assert!(submissions[0].contains("To: b@y.org"));
        assert!(submissions[0].contains("Your message 'hi' from a@x.org was removed: m1: -200"));
    }
}
