//! Config check command handler.

use anyhow::{bail, Context, Result};

use netherworld::config::validate::{
    has_errors, validate_config, validate_preamble, validate_required, Diagnostic,
    DiagnosticLevel,
};
use netherworld::config::Config;

use super::ConfigAction;

/// Validate a configuration file.
pub(crate) async fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check { config } => check(&config),
    }
}

fn check(arg: &str) -> Result<()> {
    let Some(config_path) = Config::resolve_path(arg) else {
        bail!("Config file '{}' not found", arg);
    };
    println!("Config file: {}", config_path.display());

    let content = std::fs::read_to_string(&config_path).context("Failed to read config file")?;

    let raw: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            println!("[ERROR] Invalid JSON: {}", e);
            bail!("Configuration is not valid JSON");
        }
    };

    let mut diagnostics = validate_config(&raw);

    match serde_json::from_value::<Config>(raw) {
        Ok(mut config) => {
            config.apply_env_overrides();
            diagnostics.extend(validate_required(&config));
            diagnostics.extend(preamble_diagnostic(&config));
        }
        Err(e) => diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "",
            format!("Config does not match the expected shape: {}", e),
        )),
    }

    for diag in &diagnostics {
        println!("{}", diag);
    }

    let errors = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .count();
    let warnings = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Warn)
        .count();

    if errors == 0 && warnings == 0 {
        println!("\nConfiguration looks good!");
    } else {
        println!("\nFound {} error(s), {} warning(s)", errors, warnings);
    }

    if has_errors(&diagnostics) {
        bail!("Configuration has {} error(s)", errors);
    }
    Ok(())
}

/// Token-count the preamble with the configured tokenizer.
fn preamble_diagnostic(config: &Config) -> Option<Diagnostic> {
    match netherworld::tokenizer::from_config(&config.tokenizer_settings) {
        Ok(tokenizer) => validate_preamble(config, tokenizer.as_ref()),
        Err(e) => Some(Diagnostic::new(
            DiagnosticLevel::Error,
            "tokenizer_settings.encoding",
            e.to_string(),
        )),
    }
}
