//! `taskloop config`: print configuration.

use taskloop_config::AppConfig;

pub fn show(default: bool) -> Result<(), Box<dyn std::error::Error>> {
    if default {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let path = AppConfig::config_dir().join("config.toml");
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("# {}", path.display());
    if !config.has_api_key() {
        println!("# no API key set (TASKLOOP_API_KEY or OPENAI_API_KEY)");
    }
    print!("{}", config.to_toml());
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn config_path_is_valid() {
        let path = taskloop_config::AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }
}
