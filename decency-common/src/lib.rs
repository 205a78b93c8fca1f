//! decency common definitions

#![doc(html_no_source)]
#![deny(missing_docs)]
//
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::doc_markdown)]

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

/// email address wrapper.
pub mod address;
/// SMTP reply codes.
pub mod code;
/// SMTP envelope received during a transaction.
pub mod envelop;
/// SMTP command parsing.
pub mod event;
/// message representation: header block & body.
pub mod mail;
/// shared cache correlating scoring sessions across daemons.
pub mod queue_cache;
/// per-message scoring session.
pub mod session;
/// spool directory layout & unique file management.
pub mod spool;
/// filter status & final disposition.
pub mod status;

/// Re-exported dependencies
pub mod re {
    pub use anyhow;
    pub use log;
    pub use serde_json;
}
