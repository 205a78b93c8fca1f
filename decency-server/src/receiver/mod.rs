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
use self::transaction::{Transaction, TransactionResult};
use decency_common::{
    code::SmtpReplyCode,
    envelop::Envelop,
    session::MessageSession,
    spool::{Spool, SpoolInfo},
};
use decency_config::log_channel::RECEIVER;
use decency_filter::pipeline::PipelineEngine;

mod connection;
pub(crate) mod transaction;

pub use connection::{Connection, ReadError};

/// will be executed once a full message has been received.
#[async_trait::async_trait]
pub trait OnMail {
    /// the server executes this function once a message has been received;
    /// the handler owns the final reply to the client.
    async fn on_mail<S>(
        &mut self,
        conn: &mut Connection<S>,
        envelop: Envelop,
        body: String,
    ) -> anyhow::Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send;
}

/// production handler: spool the message, run the filter pipeline, let the
/// disposition decide the SMTP reply.
pub struct FilterHandler {
    /// the spool receiving the messages.
    pub spool: Spool,
    /// the process-wide pipeline.
    pub pipeline: std::sync::Arc<PipelineEngine>,
}

#[async_trait::async_trait]
impl OnMail for FilterHandler {
    async fn on_mail<S>(
        &mut self,
        conn: &mut Connection<S>,
        envelop: Envelop,
        body: String,
    ) -> anyhow::Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    {
        let (id, mut file) = self.spool.create_message()?;
        std::io::Write::write_all(&mut file, body.as_bytes())?;
        drop(file);

        self.spool.write_sidecar(
            &id,
            &SpoolInfo {
                from: envelop.mail_from.as_ref().map(ToString::to_string),
                to: envelop.rcpt.iter().map(ToString::to_string).collect(),
                size: body.len() as u64,
            },
        )?;

        let mut session = MessageSession::new(
            self.spool.message_path(&id),
            envelop.mail_from.clone(),
            envelop.rcpt.clone(),
        )?;

        let (disposition, detail) = self.pipeline.run(&mut session).await;

        if disposition.accepted() {
            conn.send_code(SmtpReplyCode::Code250).await
        } else {
            conn.send(&format!("550 {}\r\n", sanitize_reply(&detail))).await
        }
    }
}

/// a reply line must stay one line.
fn sanitize_reply(detail: &str) -> String {
    let flat = detail.replace(['\r', '\n'], " ");
    if flat.is_empty() {
        "message refused".to_string()
    } else {
        flat
    }
}

/// Serve one client connection until it quits, hangs up or errors out.
///
/// # Errors
///
/// * stream failure, client timeout, too many client errors
pub async fn handle_connection<S, M>(conn: &mut Connection<S>, mail_handler: &mut M) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    M: OnMail + Send,
{
    conn.send_code(SmtpReplyCode::Greetings).await?;

    let mut helo_domain: Option<String> = None;
    while conn.is_alive {
        match Transaction::receive(conn, &helo_domain).await? {
            TransactionResult::Message(envelop, body) => {
                log::info!(
                    target: RECEIVER,
                    "message received from {} ({} bytes, {} rcpt)",
                    conn.client_addr,
                    body.len(),
                    envelop.rcpt.len()
                );
                helo_domain = Some(envelop.helo.clone());
                mail_handler.on_mail(conn, envelop, body).await?;
            }
            TransactionResult::Nothing => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use decency_common::address::Address;
    use decency_config::Config;
    use decency_filter::disposition::{DispositionEngine, Reinject};
    use pretty_assertions::assert_eq;

    fn test_config() -> std::sync::Arc<Config> {
        let mut config = Config::default();
        config.server.domain = "testserver.com".to_string();
        std::sync::Arc::new(config)
    }

    fn client_addr() -> std::net::SocketAddr {
        std::net::SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 0)
    }

    /// run a scripted dialogue against a handler and return everything the
    /// server wrote.
    async fn dialogue<M: OnMail + Send>(handler: &mut M, input: &str) -> String {
        dialogue_with(test_config(), handler, input).await
    }

    async fn dialogue_with<M: OnMail + Send>(
        config: std::sync::Arc<Config>,
        handler: &mut M,
        input: &str,
    ) -> String {
        let (client, server) = tokio::io::duplex(1 << 16);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let server_side = async {
            let mut conn = Connection::new(config, client_addr(), server);
            let _ = handle_connection(&mut conn, handler).await;
        };
        let client_side = async move {
            tokio::io::AsyncWriteExt::write_all(&mut client_write, input.as_bytes())
                .await
                .unwrap();
            tokio::io::AsyncWriteExt::shutdown(&mut client_write)
                .await
                .unwrap();
            let mut output = String::new();
            tokio::io::AsyncReadExt::read_to_string(&mut client_read, &mut output)
                .await
                .unwrap();
            output
        };

        let ((), output) = tokio::join!(server_side, client_side);
        output
    }

    /// accepts everything, remembers what it saw.
    #[derive(Default)]
    struct Accepting {
        received: Vec<(Envelop, String)>,
    }

    #[async_trait::async_trait]
    impl OnMail for Accepting {
        async fn on_mail<S>(
            &mut self,
            conn: &mut Connection<S>,
            envelop: Envelop,
            body: String,
        ) -> anyhow::Result<()>
        where
            S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
        {
            self.received.push((envelop, body));
            conn.send_code(SmtpReplyCode::Code250).await
        }
    }

    /// refuses everything with a detail string.
    struct Refusing;

    #[async_trait::async_trait]
    impl OnMail for Refusing {
        async fn on_mail<S>(
            &mut self,
            conn: &mut Connection<S>,
            _: Envelop,
            _: String,
        ) -> anyhow::Result<()>
        where
            S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
        {
            conn.send("550 you shall not pass\r\n").await
        }
    }

    #[tokio::test]
    async fn clean_session() {
        let mut handler = Accepting::default();
        let output = dialogue(
            &mut handler,
            concat!(
                "HELO foobar\r\n",
                "MAIL FROM:<john@doe.com>\r\n",
                "RCPT TO:<aa@bb.cc>\r\n",
                "DATA\r\n",
                "From: john@doe.com\r\n",
                "Subject: hi\r\n",
                "\r\n",
                "..dot stuffed\r\n",
                "body line\r\n",
                ".\r\n",
                "QUIT\r\n",
            ),
        )
        .await;

        assert_eq!(
            output,
            concat!(
                "220 testserver.com decency service ready\r\n",
                "250 Ok\r\n",
                "250 Ok\r\n",
                "250 Ok\r\n",
                "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
                "250 Ok\r\n",
                "221 Service closing transmission channel\r\n",
            )
        );

        let (envelop, body) = &handler.received[0];
        assert_eq!(envelop.helo, "foobar");
        assert_eq!(
            envelop.mail_from,
            Some(Address::try_from("john@doe.com".to_string()).unwrap())
        );
        assert_eq!(
            envelop.rcpt,
            vec![Address::try_from("aa@bb.cc".to_string()).unwrap()]
        );
        assert!(body.contains(".dot stuffed\n"), "transparency unstuffing");
        assert!(body.contains("body line\n"));
    }

    #[tokio::test]
    async fn null_reverse_path_is_accepted() {
        let mut handler = Accepting::default();
        dialogue(
            &mut handler,
            concat!(
                "HELO mta\r\n",
                "MAIL FROM:<>\r\n",
                "RCPT TO:<postmaster@x.org>\r\n",
                "DATA\r\n",
                ".\r\n",
                "QUIT\r\n",
            ),
        )
        .await;

        assert_eq!(handler.received[0].0.mail_from, None);
    }

    #[tokio::test]
    async fn bad_sequence_and_syntax() {
        let mut handler = Accepting::default();
        let output = dialogue(
            &mut handler,
            concat!("MAIL FROM:<john@doe.com>\r\n", "foobar\r\n", "QUIT\r\n"),
        )
        .await;

        assert_eq!(
            output,
            concat!(
                "220 testserver.com decency service ready\r\n",
                "503 Bad sequence of commands\r\n",
                "500 Syntax error command unrecognized\r\n",
                "221 Service closing transmission channel\r\n",
            )
        );
        assert!(handler.received.is_empty());
    }

    #[tokio::test]
    async fn rset_clears_the_envelope() {
        let mut handler = Accepting::default();
        dialogue(
            &mut handler,
            concat!(
                "HELO foobar\r\n",
                "MAIL FROM:<a@x.org>\r\n",
                "RCPT TO:<b@y.org>\r\n",
                "RSET\r\n",
                "MAIL FROM:<c@z.org>\r\n",
                "RCPT TO:<d@w.org>\r\n",
                "DATA\r\n",
                ".\r\n",
                "QUIT\r\n",
            ),
        )
        .await;

        let (envelop, _) = &handler.received[0];
        assert_eq!(
            envelop.mail_from,
            Some(Address::try_from("c@z.org".to_string()).unwrap())
        );
        assert_eq!(
            envelop.rcpt,
            vec![Address::try_from("d@w.org".to_string()).unwrap()]
        );
    }

    #[tokio::test]
    async fn hard_error_count_cuts_the_session() {
        let mut config = Config::default();
        config.server.domain = "testserver.com".to_string();
        config.server.smtp.error.hard_count = 2;
        config.server.smtp.error.soft_count = -1;

        let output = dialogue_with(
            std::sync::Arc::new(config),
            &mut Accepting::default(),
            "foo\r\nbar\r\nbaz\r\n",
        )
        .await;

        assert!(output.contains("500-Syntax error command unrecognized\r\n"));
        assert!(output.contains("451 Too many errors from the client\r\n"));
    }

    #[tokio::test]
    async fn handler_rejection_reaches_the_client() {
        let output = dialogue(
            &mut Refusing,
            concat!(
                "HELO foobar\r\n",
                "MAIL FROM:<a@x.org>\r\n",
                "RCPT TO:<b@y.org>\r\n",
                "DATA\r\n",
                ".\r\n",
                "QUIT\r\n",
            ),
        )
        .await;

        assert!(output.contains("550 you shall not pass\r\n"));
    }

    /// spec scenario: clean mail through the full filter handler; one
    /// pipeline with no modules, the mock downstream accepts it.
    #[tokio::test]
    async fn filter_handler_end_to_end() {
        struct MockDownstream(std::sync::Mutex<Vec<String>>);

        struct DownstreamHandle(std::sync::Arc<MockDownstream>);

        #[async_trait::async_trait]
        impl Reinject for DownstreamHandle {
            async fn reinject(
                &self,
                _: &Option<Address>,
                _: &[Address],
                content: &str,
            ) -> anyhow::Result<Option<String>> {
                self.0 .0.lock().unwrap().push(content.to_string());
                Ok(Some("DOWN99".to_string()))
            }
        }

        let root = std::env::temp_dir().join(format!(
            "decency-receiver-test-{}",
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(8)
                .collect::<String>()
        ));
        std::fs::create_dir_all(&root).unwrap();
        let spool = Spool::open(&root).unwrap();
        let cache = decency_common::queue_cache::QueueCache::new(
            root.join("cache"),
            decency_common::queue_cache::DEFAULT_TTL,
        )
        .unwrap();
        let downstream = std::sync::Arc::new(MockDownstream(std::sync::Mutex::new(vec![])));

        let filter_config = decency_config::ConfigFilter::default();
        let pipeline = std::sync::Arc::new(PipelineEngine::new(
            vec![],
            filter_config.spam.clone(),
            None,
            cache,
            spool.clone(),
            None,
            DispositionEngine::new(
                filter_config.spam.clone(),
                filter_config.virus.clone(),
                "testserver.com".to_string(),
                spool.clone(),
                Box::new(DownstreamHandle(downstream.clone())),
            ),
        ));
        let mut handler = FilterHandler { spool, pipeline };

        let output = dialogue(
            &mut handler,
            concat!(
                "HELO mta.x.org\r\n",
                "MAIL FROM:<a@x.org>\r\n",
                "RCPT TO:<b@y.org>\r\n",
                "DATA\r\n",
                "From: a@x.org\r\n",
                "Subject: all good\r\n",
                "\r\n",
                "nothing to see\r\n",
                ".\r\n",
                "QUIT\r\n",
            ),
        )
        .await;

        assert!(output.ends_with(concat!(
            "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
            "250 Ok\r\n",
            "221 Service closing transmission channel\r\n",
        )));

        let forwarded = downstream.0.lock().unwrap();
        assert_eq!(forwarded.len(), 1);
        assert!(forwarded[0].contains("Subject: all good"));
        assert!(
            !forwarded[0].contains("X-Decency-Result"),
            "no noisy headers by default"
        );
    }
}
