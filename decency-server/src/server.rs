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
use crate::receiver::{handle_connection, Connection, FilterHandler};
use decency_common::spool::Spool;
use decency_config::{log_channel::RECEIVER, Config};
use decency_filter::pipeline::PipelineEngine;

/// The ingress TCP server.
///
/// One tokio task per client connection; a task runs exactly one pipeline at
/// a time, parallelism across messages comes from concurrent connections the
/// way the MTA fans them out.
pub struct Server {
    listener: tokio::net::TcpListener,
    config: std::sync::Arc<Config>,
    spool: Spool,
    pipeline: std::sync::Arc<PipelineEngine>,
}

impl Server {
    /// Create a server from an already bound socket.
    ///
    /// # Errors
    ///
    /// * cannot convert the socket to a [`tokio::net::TcpListener`]
    pub fn new(
        config: std::sync::Arc<Config>,
        socket: std::net::TcpListener,
        spool: Spool,
        pipeline: std::sync::Arc<PipelineEngine>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            listener: tokio::net::TcpListener::from_std(socket)?,
            config,
            spool,
            pipeline,
        })
    }

    /// Get the local address of the tcp listener
    ///
    /// # Errors
    ///
    /// * cannot retrieve the local address
    pub fn addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("cannot retrieve local address: {e}"))
    }

    /// Main loop: accept, cap, spawn.
    ///
    /// # Errors
    ///
    /// * the accept loop failed
    pub async fn listen_and_serve(&self) -> anyhow::Result<()> {
        let client_counter = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0));

        loop {
            let (mut stream, client_addr) = self.listener.accept().await?;
            log::info!(target: RECEIVER, "connection from {}", client_addr);

            if self.config.server.client_count_max != -1
                && client_counter.load(std::sync::atomic::Ordering::SeqCst)
                    >= self.config.server.client_count_max
            {
                log::warn!(
                    target: RECEIVER,
                    "client count max reached, refusing {}",
                    client_addr
                );
                if let Err(e) = tokio::io::AsyncWriteExt::write_all(
                    &mut stream,
                    b"554 too many connections, try again later\r\n",
                )
                .await
                {
                    log::warn!(target: RECEIVER, "{}", e);
                }
                if let Err(e) = tokio::io::AsyncWriteExt::shutdown(&mut stream).await {
                    log::warn!(target: RECEIVER, "{}", e);
                }
                continue;
            }

            client_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

            let config = self.config.clone();
            let spool = self.spool.clone();
            let pipeline = self.pipeline.clone();
            let client_counter_copy = client_counter.clone();
            tokio::spawn(async move {
                let mut conn = Connection::new(config, client_addr, stream);
                let mut handler = FilterHandler { spool, pipeline };
                if let Err(e) = handle_connection(&mut conn, &mut handler).await {
                    log::warn!(target: RECEIVER, "session {} ended: {}", client_addr, e);
                }
                client_counter_copy.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            });
        }
    }
}
