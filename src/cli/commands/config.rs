//! brainsearch config - Show the effective configuration

use clap::Args;

use crate::app::AppContext;
use crate::cli::output;
use crate::config::Config;
use crate::error::{BsError, Result};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Dotted key to print (e.g. search.top_k_tfidf); prints everything when absent
    pub key: Option<String>,
}

pub fn run(ctx: &AppContext, args: &ConfigArgs) -> Result<()> {
    match &args.key {
        Some(key) => get_key(ctx, key),
        None => emit_config(ctx),
    }
}

fn emit_config(ctx: &AppContext) -> Result<()> {
    if ctx.robot_mode {
        return output::emit_robot(&output::robot_ok(&ctx.config));
    }

    if let Some(path) = &ctx.config_path {
        println!("# {}", path.display());
    }
    let rendered = toml::to_string_pretty(&ctx.config)
        .map_err(|err| BsError::Config(format!("render config: {err}")))?;
    println!("{rendered}");
    Ok(())
}

fn get_key(ctx: &AppContext, key: &str) -> Result<()> {
    let value = config_value_at(&ctx.config, key)?;
    if ctx.robot_mode {
        return output::emit_robot(&output::robot_ok(&value));
    }
    println!("{}", format_value(&value));
    Ok(())
}

fn config_value_at(config: &Config, key: &str) -> Result<toml::Value> {
    let doc = toml::Value::try_from(config)
        .map_err(|err| BsError::Config(format!("serialize config: {err}")))?;
    let mut current = &doc;
    for part in key.split('.') {
        current = current
            .get(part)
            .ok_or_else(|| BsError::Config(format!("unknown key: {key}")))?;
    }
    Ok(current.clone())
}

fn format_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_keys_resolve() {
        let config = Config::default();
        let value = config_value_at(&config, "search.top_k_tfidf").unwrap();
        assert_eq!(value, toml::Value::Integer(10));
        let value = config_value_at(&config, "search.backend_timeout").unwrap();
        assert_eq!(format_value(&value), "30s");
    }

    #[test]
    fn unknown_key_is_an_error() {
        let config = Config::default();
        assert!(config_value_at(&config, "search.nope").is_err());
    }
}
