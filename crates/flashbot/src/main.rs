use std::sync::Arc;

use flashbot_core::{config::Config, lifecycle::PidFile, model::ChatModel};
use flashbot_gemini::GeminiClient;
use flashbot_tunnel::{Tunnel, TunnelConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Arc::new(Config::load()?);
    flashbot_core::logging::init("flashbot", &cfg.bot_log_path)?;

    tracing::info!("bot is starting...");

    // Take over from a previous instance before anything binds the port.
    let _pidfile = PidFile::acquire(&cfg.pid_file)?;

    let tunnel = match &cfg.tunnel_command {
        Some(command) => {
            let tunnel = Tunnel::start(TunnelConfig {
                command: command.clone(),
                log_path: cfg.tunnel_log_path.clone(),
            })
            .await?;
            let url = tunnel
                .wait_for_forwarding(cfg.tunnel_startup_timeout)
                .await?;
            tracing::info!("tunnel is forwarding from {url}");
            Some(tunnel)
        }
        None => {
            tracing::info!(
                "TUNNEL_COMMAND not set; expecting an external tunnel in front of port {}",
                cfg.port
            );
            None
        }
    };

    let model: Arc<dyn ChatModel> = Arc::new(GeminiClient::new(
        cfg.gemini_api_key.clone(),
        cfg.gemini_model.clone(),
        cfg.model_timeout,
    ));

    let served = flashbot_telegram::router::run_webhook(cfg.clone(), model).await;

    if let Some(tunnel) = tunnel {
        if let Err(e) = tunnel.shutdown().await {
            tracing::warn!("failed to stop tunnel: {e}");
        }
    }

    served?;
    tracing::info!("bot stopped");
    Ok(())
}
