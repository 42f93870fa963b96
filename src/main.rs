use log::{error, info, warn};
use std::env;
use std::path::Path;
use std::process;

use tagwarden::config::TrackingConfig;
use tagwarden::snippet::{build_config_script, ScriptTag};

const DEFAULT_CONFIG_PATH: &str = "tagwarden.toml";

/// Print the `<head>` snippet for the configured site:
/// `tagwarden [config.toml]`.
fn main() {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let mut config = match load(Path::new(&path)) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            eprintln!("tagwarden: {}", e);
            process::exit(1);
        }
    };

    config.apply_env(|key| env::var(key).ok());
    if let Err(e) = config.validate() {
        error!("Invalid tracking config: {}", e);
        eprintln!("tagwarden: {}", e);
        process::exit(1);
    }

    let ids = config.google.tracked_ids();
    info!("Tracking ids: {}", ids.join(", "));
    if config.pixel.usable_id().is_none() {
        warn!("No pixel id configured; the pixel loader will stay disabled");
    }

    println!("{}", build_config_script(&config));
    // Loaders inject these themselves once consent is granted.
    println!("<!-- {} -->", ScriptTag::gtag(&config.google).to_html());
    if config.features.pixel && config.pixel.usable_id().is_some() {
        println!("<!-- {} -->", ScriptTag::pixel(&config.pixel).to_html());
    }
}

/// A missing file at the default path means built-in defaults; any other
/// path must exist.
fn load(path: &Path) -> Result<TrackingConfig, String> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        info!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
        return Ok(TrackingConfig::default());
    }
    TrackingConfig::load(path)
}
