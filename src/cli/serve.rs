//! Serve command: run the signing proxy

use clap::Args;
use std::net::SocketAddr;
use std::sync::Arc;

use super::{Cli, CliError};
use crate::proxy::{self, ProxyState};

/// Serve command arguments
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "PROXY_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,
}

impl ServeArgs {
    /// Run until Ctrl+C or SIGTERM
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let state = ProxyState::new(Arc::new(cli.transport()), Arc::new(cli.ledger().await));
        proxy::serve(self.bind, state, proxy::shutdown_signal()).await?;
        Ok(())
    }
}
