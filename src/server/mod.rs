//! Server environment and accept loop.
//!
//! One [`ServerEnv`] exists per process: the cipher environment derived
//! from the configuration, the resolved protocol/obfs plugin slots with
//! their shared global state, the live-tunnel registry and the metrics.
//! [`Server`] wraps it with the listener: accept, register, spawn one
//! tunnel task per connection. Orderly shutdown snapshots the registry and
//! signals every live tunnel.

mod config;
mod metrics;
mod registry;

pub use config::Config;
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use registry::TunnelRegistry;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::crypto::CipherEnv;
use crate::error::Result;
use crate::obfs::PluginSlot;
use crate::pipeline::TunnelCipher;
use crate::tunnel;

/// Process-wide state shared by every tunnel.
pub struct ServerEnv {
    config: Config,
    cipher: Arc<CipherEnv>,
    protocol: Option<PluginSlot>,
    obfs: Option<PluginSlot>,
    tunnels: TunnelRegistry,
    metrics: ServerMetrics,
}

impl ServerEnv {
    /// Build the environment: validate the configuration, derive the cipher
    /// environment and resolve both plugin slots.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let cipher = Arc::new(CipherEnv::new(&config.password, &config.method)?);
        let protocol = PluginSlot::protocol(&config.protocol, config.protocol_param.clone())?;
        let obfs = PluginSlot::obfs(&config.obfs, config.obfs_param.clone())?;

        Ok(Self {
            config,
            cipher,
            protocol,
            obfs,
            tunnels: TunnelRegistry::new(),
            metrics: ServerMetrics::new(),
        })
    }

    /// The gateway configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The live-tunnel registry.
    pub fn tunnels(&self) -> &TunnelRegistry {
        &self.tunnels
    }

    /// The metrics collector.
    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Build the cipher pipeline for a tunnel whose first upstream payload
    /// will be `init_package`.
    pub fn tunnel_cipher(&self, init_package: &[u8]) -> TunnelCipher {
        TunnelCipher::new(
            self.cipher.clone(),
            self.protocol.as_ref(),
            self.obfs.as_ref(),
            &self.config.remote_host,
            self.config.remote_port,
            init_package,
        )
    }
}

/// The gateway: a listener plus the shared environment.
pub struct Server {
    env: Arc<ServerEnv>,
}

impl Server {
    /// Create a server from a configuration.
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            env: Arc::new(ServerEnv::new(config)?),
        })
    }

    /// The shared environment.
    pub fn env(&self) -> Arc<ServerEnv> {
        self.env.clone()
    }

    /// Bind the configured listen address and serve until the task is
    /// dropped.
    pub async fn run(&self) -> Result<()> {
        let addr = self.env.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(
            "SOCKS5 gateway listening on {}, upstream {}:{} ({}/{}/{})",
            addr,
            self.env.config.remote_host,
            self.env.config.remote_port,
            self.env.config.method,
            self.env.config.protocol,
            self.env.config.obfs,
        );
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let env = self.env.clone();
                    let (id, shutdown) = env.tunnels.insert();
                    env.metrics.tunnel_opened();
                    tracing::debug!("tunnel {} accepted from {}", id, peer);

                    tokio::spawn(async move {
                        tokio::select! {
                            _ = shutdown.notified() => {
                                tracing::debug!("tunnel {} shut down by registry", id);
                            }
                            result = tunnel::run(stream, peer, env.clone()) => {
                                if let Err(e) = result {
                                    tracing::debug!("tunnel {} closed: {}", id, e);
                                }
                            }
                        }
                        env.tunnels.remove(id);
                        env.metrics.tunnel_closed();
                    });
                }
                Err(e) => {
                    tracing::warn!("accept error: {}", e);
                }
            }
        }
    }

    /// Signal every live tunnel to shut down.
    pub fn shutdown(&self) {
        self.env.tunnels.shutdown_all();
    }
}
