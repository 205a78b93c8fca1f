//! decency SMTP ingress and egress
//!
//! The forking frontend the MTA hands messages to, and the SMTP client that
//! pushes filtered messages back into the downstream listener.

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

/// the ingress SMTP session.
pub mod receiver;
/// the SMTP client re-submitting messages downstream.
pub mod reinject;
/// the TCP server.
pub mod server;

pub use receiver::{handle_connection, Connection, FilterHandler, OnMail};
pub use reinject::SmtpReinjector;
pub use server::Server;
