//! `netherworld run`: start one bot per config file.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use netherworld::backend::{Backend, HttpBackend, LoadRequest};
use netherworld::channels::{Channel, ChatHandler, DiscordChannel, TerminalChannel};
use netherworld::config::validate::{has_errors, validate_required};
use netherworld::config::{Config, ProviderType};
use netherworld::session::{SessionManager, SessionSettings};
use netherworld::tokenizer;

/// A bot whose model is loaded and whose handler is ready for a surface.
struct PreparedBot {
    config: Config,
    handler: Arc<ChatHandler>,
}

pub(crate) async fn cmd_run(config_args: Vec<String>) -> Result<()> {
    let mut configs = Vec::with_capacity(config_args.len());
    for arg in &config_args {
        configs.push(load_checked(arg)?);
    }

    if configs.len() > 1 {
        info!("Launching with multi config file support");
        if configs
            .iter()
            .any(|c| c.provider_settings.provider_type == ProviderType::Terminal)
        {
            bail!("Terminal provider does not support multiple config files");
        }
    }

    let mut bots = Vec::with_capacity(configs.len());
    for config in configs {
        bots.push(prepare_bot(config).await?);
    }

    if let [bot] = bots.as_slice() {
        if bot.config.provider_settings.provider_type == ProviderType::Terminal {
            let terminal = TerminalChannel::new(
                &bot.config.provider_settings.user_name,
                &bot.config.provider_settings.bot_name,
                bot.handler.clone(),
            );
            terminal.run().await?;
            return Ok(());
        }
    }

    run_discord(bots).await
}

/// Load a config and refuse to start when required settings are missing.
fn load_checked(arg: &str) -> Result<Config> {
    let config = Config::load(arg).with_context(|| format!("Failed to load config '{}'", arg))?;

    let diagnostics = validate_required(&config);
    for diag in &diagnostics {
        error!(config = arg, "{}", diag);
    }
    if has_errors(&diagnostics) {
        bail!(
            "Config '{}' is incomplete; run `netherworld config check {}` for details",
            arg,
            arg
        );
    }
    Ok(config)
}

/// Build the tokenizer and backend, load the model, and wire the handler.
///
/// A failed model load is fatal.
async fn prepare_bot(config: Config) -> Result<PreparedBot> {
    let bot_name = config.provider_settings.bot_name.clone();

    let tokenizer = tokenizer::from_config(&config.tokenizer_settings)
        .with_context(|| format!("Failed to build tokenizer for {}", bot_name))?;

    let backend = Arc::new(HttpBackend::new(
        &config.backend_settings.url,
        config.backend_timeout(),
    )?);
    backend
        .load(&LoadRequest {
            device: config.netherworld_settings.device.clone(),
            model_settings: config.model_settings.clone(),
        })
        .await
        .with_context(|| {
            format!(
                "There was an error loading the model for {}. Check the backend url and \
                 that the backend server is running",
                bot_name
            )
        })?;

    let settings = SessionSettings::from_config(&config, tokenizer.as_ref())?;
    info!(
        bot = %bot_name,
        policy = %settings.policy,
        max_tokens = settings.budget.max_tokens,
        reserve_tokens = settings.budget.reserve_tokens,
        preamble_tokens = settings.preamble_tokens,
        "Bot prepared"
    );

    let sessions = SessionManager::new(Arc::new(settings), tokenizer, backend);
    let handler = Arc::new(ChatHandler::new(sessions, &config.provider_settings));

    Ok(PreparedBot { config, handler })
}

/// Run every bot on Discord until Ctrl+C.
async fn run_discord(bots: Vec<PreparedBot>) -> Result<()> {
    let mut channels = Vec::with_capacity(bots.len());
    for bot in bots {
        let mut channel = DiscordChannel::new(bot.config.provider_settings.clone(), bot.handler);
        channel.start().await.with_context(|| {
            format!(
                "There was a problem logging {} into Discord. Check your token config?",
                bot.config.provider_settings.bot_name
            )
        })?;
        channels.push(channel);
    }

    info!(bots = channels.len(), "Running; press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Shutting down");
    for channel in &mut channels {
        if let Err(e) = channel.stop().await {
            error!(error = %e, "Failed to stop Discord channel");
        }
    }
    Ok(())
}
