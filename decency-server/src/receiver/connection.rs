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
use decency_common::code::SmtpReplyCode;
use decency_config::{log_channel::RECEIVER, Config};

/// the stream side of a line read.
#[derive(Debug)]
pub enum ReadError {
    /// the client hung up.
    Eof,
    /// anything else the stream reported.
    Other(std::io::Error),
}

/// Per-client connection state.
///
/// Generic over the stream so the scripted tests can drive a session over an
/// in-memory duplex pipe instead of a TCP socket.
pub struct Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    /// connection timestamp.
    pub timestamp: std::time::SystemTime,
    /// is still alive.
    pub is_alive: bool,
    /// server's configuration.
    pub config: std::sync::Arc<Config>,
    /// peer socket address.
    pub client_addr: std::net::SocketAddr,
    /// number of error the client made so far.
    pub error_count: i64,
    stream: tokio::io::BufReader<S>,
}

impl<S> Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    ///
    pub fn new(
        config: std::sync::Arc<Config>,
        client_addr: std::net::SocketAddr,
        stream: S,
    ) -> Self {
        Self {
            timestamp: std::time::SystemTime::now(),
            is_alive: true,
            config,
            client_addr,
            error_count: 0,
            stream: tokio::io::BufReader::new(stream),
        }
    }

    fn code_text(&self, code: SmtpReplyCode) -> String {
        self.config
            .server
            .smtp
            .codes
            .get(&code)
            .map_or_else(
                || format!("{:?} (reply text missing from configuration)\r\n", code),
                |text| text.replace("{domain}", &self.config.server.domain),
            )
    }

    /// send a reply code to the client, escalating repeated errors the way
    /// the configuration demands (soft delay, then hard cut).
    ///
    /// # Errors
    ///
    /// * the stream refused the write
    /// * the client crossed the hard error count
    pub async fn send_code(&mut self, code: SmtpReplyCode) -> anyhow::Result<()> {
        if code.is_error() {
            self.error_count += 1;

            let hard_error = self.config.server.smtp.error.hard_count;
            let soft_error = self.config.server.smtp.error.soft_count;

            if hard_error != -1 && self.error_count >= hard_error {
                let mut combined = self.code_text(code);
                // turn `XXX ` into `XXX-` so both lines form one reply.
                combined.truncate(combined.len().saturating_sub(2));
                combined.replace_range(3..4, "-");
                combined.push_str("\r\n");
                combined.push_str(&self.code_text(SmtpReplyCode::Code451TooManyError));
                self.send(&combined).await?;

                anyhow::bail!("too many errors from {}", self.client_addr)
            }

            self.send(&self.code_text(code)).await?;

            if soft_error != -1 && self.error_count >= soft_error {
                tokio::time::sleep(self.config.server.smtp.error.delay).await;
            }
        } else {
            self.send(&self.code_text(code)).await?;
        }
        Ok(())
    }

    /// Send a buffer
    ///
    /// # Errors
    ///
    /// * internal connection writer error
    pub async fn send(&mut self, reply: &str) -> anyhow::Result<()> {
        log::trace!(target: RECEIVER, "send=\"{}\"", reply.trim_end());

        tokio::io::AsyncWriteExt::write_all(self.stream.get_mut(), reply.as_bytes()).await?;
        Ok(())
    }

    /// read a line from the client
    ///
    /// # Errors
    ///
    /// * timed-out (outer error)
    /// * stream's error (inner error)
    pub async fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Result<String, ReadError>, tokio::time::error::Elapsed> {
        tokio::time::timeout(timeout, async {
            let mut buffer = String::new();
            match tokio::io::AsyncBufReadExt::read_line(&mut self.stream, &mut buffer).await {
                Ok(0) => Err(ReadError::Eof),
                Ok(_) => Ok(remove_line_ending(&buffer)),
                Err(e) => Err(ReadError::Other(e)),
            }
        })
        .await
    }
}

fn remove_line_ending(buffer: &str) -> String {
    buffer
        .strip_suffix('\n')
        .map(|b| b.strip_suffix('\r').unwrap_or(b))
        .unwrap_or(buffer)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::remove_line_ending;

    #[test]
    fn line_endings() {
        assert_eq!(remove_line_ending("HELO x\r\n"), "HELO x");
        assert_eq!(remove_line_ending("HELO x\n"), "HELO x");
        assert_eq!(remove_line_ending("HELO x"), "HELO x");
    }
}
