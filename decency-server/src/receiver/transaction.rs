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
use super::connection::{Connection, ReadError};
use decency_common::{
    address::Address, code::SmtpReplyCode, envelop::Envelop, event::Event,
};
use decency_config::{log_channel::RECEIVER, Config};

/// fallback read deadline for states without a configured one.
const TIMEOUT_DEFAULT: u64 = 5 * 60 * 1000; // 5min

/// estimated size of a message body, pre-allocated at DATA.
const MAIL_CAPACITY: usize = 10_000_000; // 10MB

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connect,
    Helo,
    MailFrom,
    RcptTo,
    Data,
    Stop,
}

/// what one transaction produced.
pub enum TransactionResult {
    /// the channel closed without a (further) message.
    Nothing,
    /// a complete message: envelope and raw data stream.
    Message(Envelop, String),
}

// Generated from a string received
enum ProcessedEvent {
    Nothing,
    Reply(SmtpReplyCode),
    ReplyChangeState(State, SmtpReplyCode),
    TransactionCompleted,
}

pub struct Transaction {
    state: State,
    envelop: Envelop,
    body: String,
}

impl Transaction {
    fn parse_and_apply_and_get_reply(
        &mut self,
        config: &Config,
        client_message: &str,
    ) -> ProcessedEvent {
        log::trace!(target: RECEIVER, "buffer=\"{}\"", client_message);

        let command_or_code = if self.state == State::Data {
            Event::parse_data
        } else {
            Event::parse_cmd
        }(client_message);

        log::trace!(target: RECEIVER, "parsed=\"{:?}\"", command_or_code);

        command_or_code.map_or_else(ProcessedEvent::Reply, |command| {
            self.process_event(config, command)
        })
    }

    fn process_event(&mut self, config: &Config, event: Event) -> ProcessedEvent {
        match (self.state, event) {
            (_, Event::NoopCmd) => ProcessedEvent::Reply(SmtpReplyCode::Code250),

            (_, Event::HelpCmd(_)) => ProcessedEvent::Reply(SmtpReplyCode::Help),

            (_, Event::RsetCmd) => {
                self.body.clear();
                let helo = std::mem::take(&mut self.envelop.helo);
                self.envelop = Envelop {
                    helo,
                    ..Envelop::default()
                };
                ProcessedEvent::ReplyChangeState(
                    if self.envelop.helo.is_empty() {
                        State::Connect
                    } else {
                        State::Helo
                    },
                    SmtpReplyCode::Code250,
                )
            }

            (_, Event::QuitCmd) => {
                ProcessedEvent::ReplyChangeState(State::Stop, SmtpReplyCode::Code221)
            }

            (_, Event::HeloCmd(helo)) => {
                self.set_helo(helo);
                ProcessedEvent::ReplyChangeState(State::Helo, SmtpReplyCode::Code250)
            }

            (_, Event::EhloCmd(helo)) => {
                self.set_helo(helo);
                ProcessedEvent::ReplyChangeState(State::Helo, SmtpReplyCode::Code250Esmtp)
            }

            (State::Helo, Event::MailCmd(reverse_path)) => {
                if reverse_path.is_empty() {
                    // null reverse-path, the MTA is forwarding a bounce.
                    self.envelop.mail_from = None;
                } else {
                    match Address::try_from(reverse_path) {
                        Ok(mail_from) => self.envelop.mail_from = Some(mail_from),
                        Err(_) => return ProcessedEvent::Reply(SmtpReplyCode::Code501),
                    }
                }
                self.envelop.rcpt.clear();
                self.body.clear();
                ProcessedEvent::ReplyChangeState(State::MailFrom, SmtpReplyCode::Code250)
            }

            (State::MailFrom | State::RcptTo, Event::RcptCmd(forward_path)) => {
                match Address::try_from(forward_path) {
                    Ok(rcpt_to) => self.envelop.rcpt.push(rcpt_to),
                    Err(_) => return ProcessedEvent::Reply(SmtpReplyCode::Code501),
                }
                if self.envelop.rcpt.len() >= config.server.smtp.rcpt_count_max {
                    ProcessedEvent::ReplyChangeState(
                        State::RcptTo,
                        SmtpReplyCode::Code452TooManyRecipients,
                    )
                } else {
                    ProcessedEvent::ReplyChangeState(State::RcptTo, SmtpReplyCode::Code250)
                }
            }

            (State::RcptTo, Event::DataCmd) => {
                self.body = String::with_capacity(MAIL_CAPACITY);
                ProcessedEvent::ReplyChangeState(State::Data, SmtpReplyCode::Code354)
            }

            (State::Data, Event::DataLine(line)) => {
                self.body.push_str(&line);
                self.body.push('\n');
                ProcessedEvent::Nothing
            }

            (State::Data, Event::DataEnd) => ProcessedEvent::TransactionCompleted,

            _ => ProcessedEvent::Reply(SmtpReplyCode::Code503),
        }
    }

    fn set_helo(&mut self, helo: String) {
        self.body.clear();
        self.envelop = Envelop {
            helo,
            mail_from: None,
            rcpt: vec![],
        };
    }
}

fn get_timeout_for_state(config: &Config, state: State) -> std::time::Duration {
    match state {
        State::Connect => config.server.smtp.timeout_client.connect,
        State::Helo => config.server.smtp.timeout_client.helo,
        State::MailFrom => config.server.smtp.timeout_client.mail_from,
        State::RcptTo => config.server.smtp.timeout_client.rcpt_to,
        State::Data => config.server.smtp.timeout_client.data,
        State::Stop => std::time::Duration::from_millis(TIMEOUT_DEFAULT),
    }
}

impl Transaction {
    /// drive the SMTP dialogue until a full message (or the end of the
    /// channel) is reached.
    ///
    /// # Errors
    ///
    /// * stream failure
    /// * client timeout
    /// * the client crossed the hard error count
    pub async fn receive<S>(
        conn: &mut Connection<S>,
        helo_domain: &Option<String>,
    ) -> anyhow::Result<TransactionResult>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    {
        let mut transaction = Self {
            state: if helo_domain.is_none() {
                State::Connect
            } else {
                State::Helo
            },
            envelop: Envelop {
                helo: helo_domain.clone().unwrap_or_default(),
                ..Envelop::default()
            },
            body: String::new(),
        };

        let mut read_timeout = get_timeout_for_state(&conn.config, transaction.state);

        loop {
            if transaction.state == State::Stop {
                conn.is_alive = false;
                return Ok(TransactionResult::Nothing);
            }
            match conn.read(read_timeout).await {
                Ok(Ok(client_message)) => {
                    let config = conn.config.clone();
                    match transaction.parse_and_apply_and_get_reply(&config, &client_message) {
                        ProcessedEvent::Nothing => {}
                        ProcessedEvent::Reply(code) => conn.send_code(code).await?,
                        ProcessedEvent::ReplyChangeState(new_state, code) => {
                            log::trace!(
                                target: RECEIVER,
                                "state: /{:?}/ => /{:?}/",
                                transaction.state,
                                new_state
                            );
                            transaction.state = new_state;
                            read_timeout = get_timeout_for_state(&config, transaction.state);
                            conn.send_code(code).await?;
                        }
                        ProcessedEvent::TransactionCompleted => {
                            return Ok(TransactionResult::Message(
                                std::mem::take(&mut transaction.envelop),
                                std::mem::take(&mut transaction.body),
                            ));
                        }
                    }
                }
                Ok(Err(ReadError::Eof)) => {
                    log::info!(target: RECEIVER, "eof from {}", conn.client_addr);
                    conn.is_alive = false;
                    return Ok(TransactionResult::Nothing);
                }
                Ok(Err(ReadError::Other(e))) => {
                    conn.is_alive = false;
                    anyhow::bail!(e)
                }
                Err(e) => {
                    conn.send_code(SmtpReplyCode::Code451Timeout).await?;
                    conn.is_alive = false;
                    anyhow::bail!(std::io::Error::new(std::io::ErrorKind::TimedOut, e))
                }
            }
        }
    }
}
