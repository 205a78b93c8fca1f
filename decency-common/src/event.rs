/*
 * Decency anti-spam content filter
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use super::code::SmtpReplyCode;

/// Commands the ingress listener understands.
///
/// Only the subset required to accept a message is implemented, see
/// "Simple Mail Transfer Protocol" https://datatracker.ietf.org/doc/html/rfc5321
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Event {
    /// Used to identify the SMTP client to the SMTP server.
    /// Syntax = `"HELO" SP ( Domain / address-literal ) CRLF`
    HeloCmd(String),
    /// Used to identify the SMTP client and request smtp extensions.
    /// Syntax = `"EHLO" SP ( Domain / address-literal ) CRLF`
    EhloCmd(String),
    /// Initiates a mail transaction. An empty string is the null
    /// reverse-path (`<>`).
    /// Syntax = `"MAIL FROM:" Reverse-path [SP Mail-parameters] CRLF`
    MailCmd(String),
    /// Identifies an individual recipient of the mail data.
    /// Syntax = `"RCPT TO:" Forward-path [SP Rcpt-parameters] CRLF`
    RcptCmd(String),
    /// Causes the mail data to be appended to the mail data buffer.
    /// Syntax = `"DATA" CRLF`
    DataCmd,
    /// Lines ended by CRLF sent between [`Event::DataCmd`] and [`Event::DataEnd`]
    DataLine(String),
    /// The mail data are terminated by a line containing only a period.
    /// Syntax = `"." CRLF`
    DataEnd,
    /// Aborts the current mail transaction.
    /// Syntax = `"RSET" CRLF`
    RsetCmd,
    /// Syntax = `"NOOP" [ SP String ] CRLF`
    NoopCmd,
    /// Syntax = `"HELP" [ SP String ] CRLF`
    HelpCmd(Option<String>),
    /// Closes the transmission channel.
    /// Syntax = `"QUIT" CRLF`
    QuitCmd,
}

impl Event {
    /// Create a valid SMTP command (or event) from a string OR return a SMTP error code
    /// See https://datatracker.ietf.org/doc/html/rfc5321#section-4.1
    ///
    /// # Errors
    ///
    /// * the line is empty, too long, or not a recognized verb
    pub fn parse_cmd(input: &str) -> Result<Self, SmtpReplyCode> {
        // 88 = 80 - "\r\n".len() + (SMTPUTF8 ? 10 : 0)
        if input.len() > 88 || input.is_empty() {
            return Err(SmtpReplyCode::Code500);
        }

        let words = input.split_whitespace().collect::<Vec<&str>>();

        let mut smtp_args = words.iter();
        let smtp_verb = smtp_args
            .next()
            .map(|s| s.to_ascii_uppercase())
            .ok_or(SmtpReplyCode::Code500)?;

        match smtp_verb.as_str() {
            "HELO" => match (smtp_args.next(), smtp_args.next()) {
                (Some(domain), None) => Ok(Self::HeloCmd((*domain).to_string())),
                _ => Err(SmtpReplyCode::Code501),
            },
            "EHLO" => match (smtp_args.next(), smtp_args.next()) {
                (Some(domain), None) => Ok(Self::EhloCmd((*domain).to_string())),
                _ => Err(SmtpReplyCode::Code501),
            },
            "MAIL" => Self::parse_path(input, "MAIL", "FROM", true).map(Self::MailCmd),
            "RCPT" => Self::parse_path(input, "RCPT", "TO", false).map(Self::RcptCmd),
            "DATA" => match smtp_args.next() {
                None => Ok(Self::DataCmd),
                Some(_) => Err(SmtpReplyCode::Code501),
            },
            "RSET" => match smtp_args.next() {
                None => Ok(Self::RsetCmd),
                Some(_) => Err(SmtpReplyCode::Code501),
            },
            "NOOP" => Ok(Self::NoopCmd),
            "HELP" => Ok(Self::HelpCmd(smtp_args.next().map(|s| (*s).to_string()))),
            "QUIT" => match smtp_args.next() {
                None => Ok(Self::QuitCmd),
                Some(_) => Err(SmtpReplyCode::Code501),
            },
            _ => Err(SmtpReplyCode::Code500),
        }
    }

    /// extract the address of a `MAIL FROM:<path>` / `RCPT TO:<path>` argument.
    ///
    /// any ESMTP parameters after the path are ignored; the filter does not
    /// negotiate extensions with the upstream MTA.
    fn parse_path(
        input: &str,
        verb: &str,
        keyword: &str,
        allow_null: bool,
    ) -> Result<String, SmtpReplyCode> {
        let args = input[verb.len()..].trim_start();
        let rest = args
            .get(..keyword.len())
            .filter(|s| s.eq_ignore_ascii_case(keyword))
            .map(|_| args[keyword.len()..].trim_start())
            .ok_or(SmtpReplyCode::Code501)?;
        let rest = rest.strip_prefix(':').ok_or(SmtpReplyCode::Code501)?;

        let path = rest.trim_start().split_whitespace().next().unwrap_or("");
        let inner = path
            .strip_prefix('<')
            .and_then(|p| p.strip_suffix('>'))
            .ok_or(SmtpReplyCode::Code501)?;

        if inner.is_empty() && !allow_null {
            return Err(SmtpReplyCode::Code501);
        }
        Ok(inner.to_string())
    }

    /// Create a valid SMTP data line (or the end-of-data event) from a string
    /// See https://datatracker.ietf.org/doc/html/rfc5321#section-4.1.1.4
    ///
    /// # Errors
    ///
    /// * the line exceeds the rfc maximum length
    pub fn parse_data(input: &str) -> Result<Self, SmtpReplyCode> {
        match input {
            "." => Ok(Self::DataEnd),
            too_long if too_long.len() > 998 => Err(SmtpReplyCode::Code500),
            // transparency: a leading dot doubled by the client is unstuffed here.
            dotted if dotted.starts_with('.') => Ok(Self::DataLine(dotted[1..].to_string())),
            _ => Ok(Self::DataLine(input.to_string())),
        }
    }
}
