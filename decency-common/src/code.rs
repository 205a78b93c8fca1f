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

/// Replies the ingress listener can produce.
///
/// The reply text is configurable, see the `codes` table of the server
/// configuration; this enum is the key.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Deserialize,
    serde::Serialize,
)]
pub enum SmtpReplyCode {
    /// 220 service ready, sent when the client connects.
    Greetings,
    /// 221 closing channel.
    Code221,
    /// 250 ok.
    Code250,
    /// 250 esmtp extension listing.
    Code250Esmtp,
    /// 354 start mail input.
    Code354,
    /// 451 client timed out.
    Code451Timeout,
    /// 451 the client accumulated too many errors.
    Code451TooManyError,
    /// 452 recipient cap reached.
    Code452TooManyRecipients,
    /// 500 unrecognized command.
    Code500,
    /// 501 syntax error in parameters.
    Code501,
    /// 502 command not implemented.
    Code502,
    /// 503 bad sequence of commands.
    Code503,
    /// 550 message refused by the filter.
    Code550,
    /// 554 permanent failure.
    Code554,
    /// 214 help.
    Help,
}

impl SmtpReplyCode {
    /// does sending this code count as a client error?
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(
            self,
            Self::Code451Timeout
                | Self::Code451TooManyError
                | Self::Code452TooManyRecipients
                | Self::Code500
                | Self::Code501
                | Self::Code502
                | Self::Code503
                | Self::Code550
                | Self::Code554
        )
    }
}

#[cfg(test)]
mod tests {
    use super::SmtpReplyCode;

    #[test]
    fn error_classes() {
        assert!(SmtpReplyCode::Code500.is_error());
        assert!(SmtpReplyCode::Code550.is_error());
        assert!(!SmtpReplyCode::Code250.is_error());
        assert!(!SmtpReplyCode::Greetings.is_error());
    }
}
