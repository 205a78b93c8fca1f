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
    module::{CorpusLabel, FilterModule},
    signal::FilterSignal,
};
use anyhow::Context;
use decency_common::{address::Address, session::MessageSession};
use decency_config::log_channel::TRAIN;

/// what to do with a corpus file once every module has seen it.
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    /// move consumed files here.
    pub move_to: Option<std::path::PathBuf>,
    /// delete consumed files. wins over `move_to`.
    pub delete: bool,
}

/// per-module outcome buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainCounters {
    /// the module already classified the sample correctly.
    pub not_required: u64,
    /// the module was wrong and got fed the sample.
    pub trained: u64,
    /// the module (or its training command) failed on the sample.
    pub errors: u64,
}

/// aggregated outcome of one corpus run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainReport {
    /// counters per module name.
    pub modules: std::collections::BTreeMap<String, TrainCounters>,
    /// how many corpus files were processed.
    pub samples: u64,
}

impl std::fmt::Display for TrainReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} samples", self.samples)?;
        writeln!(f, "{:<20} {:>12} {:>8} {:>7}", "module", "not required", "trained", "errors")?;
        for (module, counters) in &self.modules {
            writeln!(
                f,
                "{:<20} {:>12} {:>8} {:>7}",
                module, counters.not_required, counters.trained, counters.errors
            )?;
        }
        Ok(())
    }
}

/// Feed a labeled corpus directory into every trainable module.
///
/// A module is only trained on samples it still gets wrong: a spam-labeled
/// sample it already scores negative (or classifies outright) is counted as
/// `not_required`, same for a ham-labeled sample scored non-negative.
///
/// # Errors
///
/// * the corpus directory cannot be read
pub async fn train_corpus(
    modules: &[Box<dyn FilterModule>],
    corpus: &std::path::Path,
    label: CorpusLabel,
    options: &TrainOptions,
) -> anyhow::Result<TrainReport> {
    let mut files = std::fs::read_dir(corpus)
        .with_context(|| format!("cannot read corpus directory {}", corpus.display()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect::<Vec<_>>();
    files.sort();

    let trainable = modules
        .iter()
        .filter(|module| module.trainable())
        .collect::<Vec<_>>();
    if trainable.is_empty() {
        log::warn!(target: TRAIN, "no trainable module in the chain");
    }

    let mut report = TrainReport::default();
    for file in files {
        report.samples += 1;

        for module in &trainable {
            let counters = report.modules.entry(module.name().to_string()).or_default();

            let mut session = match corpus_session(&file) {
                Ok(session) => session,
                Err(e) => {
                    log::warn!(target: TRAIN, "skipping {}: {}", file.display(), e);
                    counters.errors += 1;
                    continue;
                }
            };

            let classifies_spam = match module.handle(&mut session).await {
                Ok(()) => session.spam_score < 0,
                Err(FilterSignal::Spam(_)) => true,
                Err(signal) => {
                    log::warn!(
                        target: TRAIN,
                        "module '{}' cannot classify {}: {}",
                        module.name(),
                        file.display(),
                        signal
                    );
                    counters.errors += 1;
                    continue;
                }
            };

            let correct = match label {
                CorpusLabel::Spam => classifies_spam,
                CorpusLabel::Ham => !classifies_spam,
            };
            if correct {
                counters.not_required += 1;
                continue;
            }

            match module.train(&mut session, label).await {
                Ok(()) => counters.trained += 1,
                Err(e) => {
                    log::error!(
                        target: TRAIN,
                        "training '{}' on {} failed: {}",
                        module.name(),
                        file.display(),
                        e
                    );
                    counters.errors += 1;
                }
            }
        }

        dispose_sample(&file, options);
    }

    Ok(report)
}

/// build a synthetic session around a corpus file; the envelope is
/// reconstructed from the From/To headers as far as possible.
fn corpus_session(file: &std::path::Path) -> anyhow::Result<MessageSession> {
    let mut session = MessageSession::new(file, None, vec![])?;
    let mail = session.mail()?;

    let from = mail
        .get_header("From")
        .and_then(extract_address);
    let to = mail
        .get_header("To")
        .and_then(extract_address)
        .into_iter()
        .collect();

    session.from = from;
    session.to = to;
    Ok(session)
}

/// pull a bare address out of a display header like `Name <a@b.c>`.
fn extract_address(header: &str) -> Option<Address> {
    let bare = header
        .rsplit_once('<')
        .and_then(|(_, rest)| rest.split_once('>').map(|(addr, _)| addr))
        .unwrap_or(header)
        .trim();
    Address::try_from(bare.to_string()).ok()
}

fn dispose_sample(file: &std::path::Path, options: &TrainOptions) {
    if options.delete {
        if let Err(e) = std::fs::remove_file(file) {
            log::warn!(target: TRAIN, "cannot delete {}: {}", file.display(), e);
        }
        return;
    }
    if let Some(move_to) = &options.move_to {
        let target = move_to.join(file.file_name().unwrap_or_default());
        if let Err(e) = std::fs::create_dir_all(move_to).and_then(|()| std::fs::rename(file, &target))
        {
            log::warn!(
                target: TRAIN,
                "cannot move {} to {}: {}",
                file.display(),
                target.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::FilterResult;

    /// calls the sample spam when the body contains the word SPAMMY.
    struct KeywordModule {
        trainings: std::sync::Mutex<Vec<(String, CorpusLabel)>>,
    }

    #[async_trait::async_trait]
    impl FilterModule for std::sync::Arc<KeywordModule> {
        fn name(&self) -> &str {
            "keyword"
        }

        async fn handle(&self, session: &mut MessageSession) -> FilterResult<()> {
            let spammy = session
                .mail()
                .map_err(FilterSignal::Other)?
                .body
                .iter()
                .any(|line| line.contains("SPAMMY"));
            if spammy {
                session.add_score(-100, "keyword: SPAMMY".to_string());
            }
            Ok(())
        }

        fn trainable(&self) -> bool {
            true
        }

        async fn train(
            &self,
            session: &mut MessageSession,
            label: CorpusLabel,
        ) -> anyhow::Result<()> {
            self.trainings
                .lock()
                .unwrap()
                .push((session.id.clone(), label));
            Ok(())
        }
    }

    fn corpus_with(samples: &[(&str, &str)]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "decency-train-test-{}",
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(8)
                .collect::<String>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        for (name, content) in samples {
            std::fs::write(dir.join(name), content).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn trains_only_the_misclassified() {
        let corpus = corpus_with(&[
            ("sample-a", "From: a@x.org\n\nthis is SPAMMY content\n"),
            ("sample-b", "From: a@x.org\n\nperfectly fine newsletter\n"),
        ]);
        let module = std::sync::Arc::new(KeywordModule {
            trainings: std::sync::Mutex::new(vec![]),
        });
        let modules: Vec<Box<dyn FilterModule>> = vec![Box::new(module.clone())];

        let report = train_corpus(&modules, &corpus, CorpusLabel::Spam, &TrainOptions::default())
            .await
            .unwrap();

        assert_eq!(report.samples, 2);
        let counters = report.modules["keyword"];
        assert_eq!(counters.not_required, 1, "sample-a is already classified");
        assert_eq!(counters.trained, 1, "sample-b needed the lesson");
        assert_eq!(counters.errors, 0);
        assert_eq!(
            module.trainings.lock().unwrap()[0],
            ("sample-b".to_string(), CorpusLabel::Spam)
        );
    }

    #[tokio::test]
    async fn ham_corpus_inverts_correctness() {
        let corpus = corpus_with(&[("sample-a", "From: a@x.org\n\nthis is SPAMMY content\n")]);
        let module = std::sync::Arc::new(KeywordModule {
            trainings: std::sync::Mutex::new(vec![]),
        });
        let modules: Vec<Box<dyn FilterModule>> = vec![Box::new(module.clone())];

        let report = train_corpus(&modules, &corpus, CorpusLabel::Ham, &TrainOptions::default())
            .await
            .unwrap();

        assert_eq!(report.modules["keyword"].trained, 1, "a false positive");
    }

    #[tokio::test]
    async fn consumed_files_can_be_moved() {
        let corpus = corpus_with(&[("sample-a", "From: a@x.org\n\nok\n")]);
        let consumed = corpus.join("done");
        let module = std::sync::Arc::new(KeywordModule {
            trainings: std::sync::Mutex::new(vec![]),
        });
        let modules: Vec<Box<dyn FilterModule>> = vec![Box::new(module)];

        train_corpus(
            &modules,
            &corpus,
            CorpusLabel::Ham,
            &TrainOptions {
                move_to: Some(consumed.clone()),
                delete: false,
            },
        )
        .await
        .unwrap();

        assert!(consumed.join("sample-a").exists());
        assert!(!corpus.join("sample-a").exists());
    }

    #[tokio::test]
    async fn consumed_files_can_be_deleted() {
        let corpus = corpus_with(&[("sample-a", "From: a@x.org\n\nok\n")]);
        let module = std::sync::Arc::new(KeywordModule {
            trainings: std::sync::Mutex::new(vec![]),
        });
        let modules: Vec<Box<dyn FilterModule>> = vec![Box::new(module)];

        train_corpus(
            &modules,
            &corpus,
            CorpusLabel::Ham,
            &TrainOptions {
                move_to: None,
                delete: true,
            },
        )
        .await
        .unwrap();

        assert!(!corpus.join("sample-a").exists());
    }
}
