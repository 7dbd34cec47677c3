//! `taskloop tools`: list the tools of the configured backend.

use taskloop_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let catalog = taskloop_tools::build_catalog(&config).await?;
    let tools = catalog.list_tools().await?;

    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    println!("{} tools:", tools.len());
    for tool in &tools {
        println!("  {:<24} {}", tool.name, first_line(&tool.description));
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_line_of_description() {
        assert_eq!(first_line("Fetch a page.\nMore detail."), "Fetch a page.");
        assert_eq!(first_line(""), "");
    }
}
