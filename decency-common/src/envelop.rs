/*
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
*/
use crate::address::Address;

/// Data received during a smtp transaction.
///
/// `mail_from` is `None` for the null reverse-path (`MAIL FROM:<>`),
/// which the MTA uses for bounce notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Envelop {
    /// result of the HELO/EHLO command.
    pub helo: String,
    /// the sender of the email received using the MAIL FROM command.
    pub mail_from: Option<Address>,
    /// a list of recipients received using the RCPT TO command.
    pub rcpt: Vec<Address>,
}

impl Envelop {
    /// reverse-path in angle-bracket form, `<>` for the null sender.
    #[must_use]
    pub fn reverse_path(&self) -> String {
        self.mail_from
            .as_ref()
            .map_or_else(|| "<>".to_string(), |from| format!("<{from}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_path() {
        let mut envelop = Envelop::default();
        assert_eq!(envelop.reverse_path(), "<>");

        envelop.mail_from = Some(Address::try_from("john@doe.com".to_string()).unwrap());
        assert_eq!(envelop.reverse_path(), "<john@doe.com>");
    }
}
