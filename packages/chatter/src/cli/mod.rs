pub mod connect;

use anyhow::Result;

use crate::config::{self, ChatterConfig, FileConfig};
use connect::{ChatEndpoint, ClientError, Identity};

/// Resolve the server address from args or config and open a chat session.
pub async fn connect_command(
    config: &ChatterConfig,
    endpoint: ChatEndpoint,
    url: Option<String>,
    user: Option<String>,
) -> Result<()> {
    let file_config: FileConfig = config::load_config(&config.data_dir, None).extract()?;

    let base = url.unwrap_or_else(|| {
        let host = match file_config.server.host.as_deref() {
            None | Some("0.0.0.0") => "127.0.0.1",
            Some(host) => host,
        };
        let port = file_config.server.port.unwrap_or(config::DEFAULT_PORT);
        format!("ws://{host}:{port}")
    });
    let target = connect::endpoint_url(&base, endpoint);

    let identity = user.as_deref().map(|user| Identity {
        header: &file_config.auth.identity_header,
        user,
    });

    match connect::connect_command(&target, identity).await {
        Ok(()) => Ok(()),
        Err(ClientError::Unavailable) => {
            eprintln!("[chatter: no server at {base}]");
            Ok(())
        }
        Err(ClientError::Other(e)) => Err(e),
    }
}
