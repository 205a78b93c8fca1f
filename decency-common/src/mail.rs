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

/// we use Vec instead of a HashMap because header ordering is important.
pub type MailHeaders = Vec<(String, String)>;

/// Message representation: the mutable header block and the untouched body.
///
/// Filter modules only rewrite headers; bodies travel through the pipeline
/// verbatim, so no full MIME tree is materialized.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Mail {
    /// Message 's headers, original casing preserved.
    pub headers: MailHeaders,
    /// Message body lines, not interpreted.
    pub body: Vec<String>,
}

impl Mail {
    /// parse a raw rfc5322 message: the header block runs until the first
    /// empty line, folded continuation lines are joined.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut headers = MailHeaders::default();
        let mut lines = raw.lines();

        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                // folded continuation of the previous header.
                if let Some((_, value)) = headers.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim_start());
                }
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.push((name.trim().to_string(), value.trim().to_string()));
                }
                // garbage before the first empty line is kept as a nameless
                // header so round-trips stay loss-less.
                None => headers.push((line.to_string(), String::new())),
            }
        }

        Self {
            headers,
            body: lines.map(str::to_string).collect(),
        }
    }

    /// first value of the named header, case-insensitive.
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// all values of the named header, in message order.
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// replace the first occurrence of the header, or append it at the end of
    /// the block when absent.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
        {
            Some((_, old)) => *old = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// remove every occurrence of the named header, returning how many were dropped.
    pub fn remove_header(&mut self, name: &str) -> usize {
        let before = self.headers.len();
        self.headers
            .retain(|(header, _)| !header.eq_ignore_ascii_case(name));
        before - self.headers.len()
    }

    /// prefix the Subject header, creating it when missing.
    ///
    /// re-running the pipeline over an already tagged message must not stack
    /// prefixes, so a subject already carrying it is left alone.
    pub fn prefix_subject(&mut self, prefix: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(header, _)| header.eq_ignore_ascii_case("subject"))
        {
            Some((_, subject)) if subject.starts_with(prefix) => {}
            Some((_, subject)) => *subject = format!("{prefix}{subject}"),
            None => self
                .headers
                .push(("Subject".to_string(), prefix.to_string())),
        }
    }

    /// get the header section of the email.
    #[must_use]
    pub fn raw_headers(&self) -> String {
        self.headers
            .iter()
            .map(|(header, value)| {
                if value.is_empty() && !header.contains(':') {
                    header.clone()
                } else {
                    format!("{header}: {value}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// return the text representation of the email.
    #[must_use]
    pub fn to_raw(&self) -> String {
        format!("{}\n\n{}", self.raw_headers(), self.body.join("\n"))
    }
}
