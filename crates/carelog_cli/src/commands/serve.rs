//! Serve and token command implementations.

use super::CommandResult;
use carelog_sync_server::{ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::sync::Arc;

/// Builds the server configuration from command-line options.
pub fn server_config(
    bind: SocketAddr,
    auth_secret: Option<&str>,
    max_push_batch: usize,
) -> ServerConfig {
    let config = ServerConfig::new(bind).with_max_push_batch(max_push_batch);
    match auth_secret {
        Some(secret) => config.with_auth(secret.as_bytes().to_vec()),
        None => config,
    }
}

/// Runs the reference sync server until interrupted.
pub async fn run(config: ServerConfig) -> CommandResult {
    if !config.require_auth {
        tracing::warn!("authentication disabled");
    }
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let server = Arc::new(SyncServer::new(config));

    tokio::select! {
        result = carelog_sync_server::serve(listener, server) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}

/// Prints a bearer token for a device.
pub fn issue_token(auth_secret: &str, device_id: &str) -> CommandResult {
    let server = SyncServer::new(server_config(
        ServerConfig::default().bind_addr,
        Some(auth_secret),
        ServerConfig::default().max_push_batch,
    ));
    let token = server
        .issue_token(device_id)?
        .ok_or("authentication is not enabled")?;
    println!("{token}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_is_optional() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        assert!(!server_config(addr, None, 10).require_auth);

        let config = server_config(addr, Some("secret"), 10);
        assert!(config.require_auth);
        assert_eq!(config.max_push_batch, 10);
    }

    #[test]
    fn token_is_issued() {
        assert!(issue_token("secret", "device-1").is_ok());
    }
}
