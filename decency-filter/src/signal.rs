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

/// How a module run can terminate besides a plain return.
///
/// Classifying signals (`Spam`, `Virus`, `Drop`) stop the chain; everything
/// else is logged and the pipeline moves on to the next module.
#[derive(Debug)]
pub enum FilterSignal {
    /// the module is certain the message is spam.
    Spam(String),
    /// the message carries the named virus.
    Virus(String),
    /// swallow the message without classification.
    Drop(String),
    /// the message exceeds the module's size limit.
    FileTooBig,
    /// the module gave up on its own deadline.
    Timeout,
    /// anything else; never classifies, never crashes the worker.
    Other(anyhow::Error),
}

/// what a module's `handle` returns.
pub type FilterResult<T> = Result<T, FilterSignal>;

impl std::fmt::Display for FilterSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spam(detail) => write!(f, "identified as spam: {detail}"),
            Self::Virus(label) => write!(f, "virus found: {label}"),
            Self::Drop(reason) => write!(f, "message dropped: {reason}"),
            Self::FileTooBig => f.write_str("message exceeds the module size limit"),
            Self::Timeout => f.write_str("module timed out"),
            Self::Other(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for FilterSignal {}

impl From<anyhow::Error> for FilterSignal {
    fn from(error: anyhow::Error) -> Self {
        Self::Other(error)
    }
}

/// status label used by the statistics accounting.
impl FilterSignal {
    /// uppercase tag recorded per module run.
    #[must_use]
    pub const fn stat_label(&self) -> &'static str {
        match self {
            Self::Spam(_) => "SPAM",
            Self::Virus(_) => "VIRUS",
            Self::Drop(_) => "DROP",
            Self::FileTooBig => "TOOBIG",
            Self::Timeout => "TIMEOUT",
            Self::Other(_) => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FilterSignal;

    #[test]
    fn display() {
        assert_eq!(
            format!("{}", FilterSignal::Virus("Eicar-Test".to_string())),
            "virus found: Eicar-Test"
        );
        assert_eq!(
            format!("{}", FilterSignal::Spam("score -160".to_string())),
            "identified as spam: score -160"
        );
    }

    #[test]
    fn stat_labels() {
        assert_eq!(FilterSignal::Timeout.stat_label(), "TIMEOUT");
        assert_eq!(FilterSignal::FileTooBig.stat_label(), "TOOBIG");
    }
}
