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
use decency_common::address::Address;
use decency_config::{log_channel::REINJECT, ConfigReinject};
use decency_filter::disposition::Reinject;
use lettre::Tokio1Executor;

/// queue-id token in the downstream's DATA acknowledgment.
const QUEUED_AS_PATTERN: &str = r"queued as ([A-Z0-9]+)";

fn queued_as_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(QUEUED_AS_PATTERN).expect("pattern is valid"))
}

/// SMTP client re-submitting filtered messages to the downstream listener
/// the MTA picks them up from.
pub struct SmtpReinjector {
    host: String,
    port: u16,
    helo: String,
}

impl SmtpReinjector {
    ///
    #[must_use]
    pub fn new(config: &ConfigReinject) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            helo: config.helo.clone(),
        }
    }

    /// plain transport; the downstream sits on the same host or a trusted
    /// segment, there is no TLS to negotiate.
    fn build_transport(&self) -> lettre::AsyncSmtpTransport<Tokio1Executor> {
        lettre::AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
            .port(self.port)
            .hello_name(lettre::transport::smtp::extension::ClientId::Domain(
                self.helo.clone(),
            ))
            .build()
    }
}

/// build a [lettre] envelope from the session envelope.
fn build_envelope(
    from: &Option<Address>,
    to: &[Address],
) -> anyhow::Result<lettre::address::Envelope> {
    Ok(lettre::address::Envelope::new(
        from.as_ref()
            .map(|from| from.to_string().parse())
            .transpose()
            .context("failed to parse from address")?,
        to.iter()
            // NOTE: address that couldn't be converted will be silently dropped.
            .flat_map(|rcpt| rcpt.to_string().parse::<lettre::Address>())
            .collect(),
    )?)
}

/// every line crosses the wire CRLF terminated, whatever the spool holds.
fn normalize_crlf(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\n', "\r\n")
}

#[async_trait::async_trait]
impl Reinject for SmtpReinjector {
    async fn reinject(
        &self,
        from: &Option<Address>,
        to: &[Address],
        content: &str,
    ) -> anyhow::Result<Option<String>> {
        let envelope = build_envelope(from, to)?;
        let wire = normalize_crlf(content);

        let response = lettre::AsyncTransport::send_raw(
            &self.build_transport(),
            &envelope,
            wire.as_bytes(),
        )
        .await
        .with_context(|| format!("downstream {}:{} refused the message", self.host, self.port))?;

        let reply = response.message().collect::<Vec<_>>().join(" ");
        let next_id = queued_as_regex()
            .captures(&reply)
            .map(|captures| captures[1].to_string());

        log::debug!(
            target: REINJECT,
            "downstream accepted ('{}'), successor queue-id {:?}",
            reply,
            next_id
        );
        Ok(next_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// a downstream listener speaking just enough SMTP for one submission.
    async fn fake_downstream(reply_to_data: &'static str) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = tokio::io::BufReader::new(stream);
            let mut in_data = false;

            macro_rules! reply {
                ($line:expr) => {
                    tokio::io::AsyncWriteExt::write_all(
                        stream.get_mut(),
                        concat!($line, "\r\n").as_bytes(),
                    )
                    .await
                    .unwrap()
                };
            }

            reply!("220 downstream ready");
            loop {
                let mut line = String::new();
                if tokio::io::AsyncBufReadExt::read_line(&mut stream, &mut line)
                    .await
                    .unwrap()
                    == 0
                {
                    break;
                }
                let line = line.trim_end();
                if in_data {
                    if line == "." {
                        in_data = false;
                        tokio::io::AsyncWriteExt::write_all(
                            stream.get_mut(),
                            format!("{reply_to_data}\r\n").as_bytes(),
                        )
                        .await
                        .unwrap();
                    }
                    continue;
                }
                let verb = line.split_whitespace().next().unwrap_or("").to_uppercase();
                match verb.as_str() {
                    "EHLO" => reply!("250-downstream\r\n250 8BITMIME"),
                    "HELO" => reply!("250 downstream"),
                    "MAIL" | "RCPT" => reply!("250 Ok"),
                    "DATA" => {
                        in_data = true;
                        reply!("354 go ahead");
                    }
                    "QUIT" => {
                        reply!("221 bye");
                        break;
                    }
                    _ => reply!("250 Ok"),
                }
            }
        });

        addr
    }

    fn reinjector_for(addr: std::net::SocketAddr) -> SmtpReinjector {
        SmtpReinjector::new(&ConfigReinject {
            host: addr.ip().to_string(),
            port: addr.port(),
            helo: "filter.example.org".to_string(),
        })
    }

    fn envelope_parts() -> (Option<Address>, Vec<Address>) {
        (
            Some(Address::try_from("a@x.org".to_string()).unwrap()),
            vec![Address::try_from("b@y.org".to_string()).unwrap()],
        )
    }

    #[tokio::test]
    async fn successor_queue_id_is_captured() {
        let addr = fake_downstream("250 Ok: queued as ABC123").await;
        let (from, to) = envelope_parts();

        let next_id = reinjector_for(addr)
            .reinject(&from, &to, "From: a@x.org\nSubject: hi\n\nbody\n")
            .await
            .unwrap();
        assert_eq!(next_id.as_deref(), Some("ABC123"));
    }

    #[tokio::test]
    async fn acknowledgment_without_queue_id() {
        let addr = fake_downstream("250 Ok").await;
        let (from, to) = envelope_parts();

        let next_id = reinjector_for(addr)
            .reinject(&from, &to, "From: a@x.org\n\nbody\n")
            .await
            .unwrap();
        assert_eq!(next_id, None);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        // a bound-then-dropped listener leaves a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let (from, to) = envelope_parts();

        assert!(reinjector_for(addr)
            .reinject(&from, &to, "From: a@x.org\n\nbody\n")
            .await
            .is_err());
    }

    #[test]
    fn crlf_normalization() {
        assert_eq!(normalize_crlf("a\nb\r\nc\n"), "a\r\nb\r\nc\r\n");
    }

    #[test]
    fn queued_as_parsing() {
        assert_eq!(
            queued_as_regex()
                .captures("250 2.0.0 Ok: queued as B17F21A30")
                .map(|c| c[1].to_string()),
            Some("B17F21A30".to_string())
        );
        assert!(queued_as_regex().captures("250 Ok").is_none());
    }
}
