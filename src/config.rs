//! Optional config file loading. Search order: ./novelfetch.toml, then
//! $XDG_CONFIG_HOME/novelfetch/config.toml (or ~/.config/novelfetch/config.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "novelfetch.toml";

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct Config {
    /// Base directory for downloaded novels. Default "novels", relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// User-Agent pool rotated across direct requests.
    pub user_agents: Option<Vec<String>>,
    /// Delay in seconds before each chapter request.
    pub request_delay_secs: Option<u64>,
    /// Direct request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Escalate to the headless browser when a direct page looks incomplete (default true).
    pub render: Option<bool>,
    /// Browser navigation timeout in seconds.
    pub render_timeout_secs: Option<u64>,
    /// Seconds to wait after navigation for scripts to fill the page.
    pub render_settle_secs: Option<u64>,
    /// Chrome/Chromium executable. Unset means auto-detect.
    pub chrome_path: Option<PathBuf>,
    /// Stop after this many chapters.
    pub max_chapters: Option<usize>,
    /// Chapter file format: text (default) or markdown.
    pub format: Option<String>,
    /// Duplicate chapter detection: exact (default) or normalized.
    pub title_match: Option<String>,
    /// Lines shown per page by the reader.
    pub lines_per_page: Option<usize>,
}

/// Default search paths, most specific first.
pub fn config_paths() -> Result<Vec<PathBuf>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join(CONFIG_FILE_NAME)];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("novelfetch").join("config.toml"));
    }
    Ok(paths)
}

/// Load the first config file found in the default search paths.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    load_config_from(&config_paths()?)
}

/// Load the first existing file among `paths`.
pub fn load_config_from(paths: &[PathBuf]) -> Result<Option<Config>, String> {
    for path in paths {
        if path.exists() {
            let config = read_config(path)?;
            tracing::debug!(path = %path.display(), "loaded config");
            return Ok(Some(config));
        }
    }
    Ok(None)
}

fn read_config(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() -> Result<(), toml::de::Error> {
        let c: Config = toml::from_str("")?;
        assert!(c.output_dir.is_none());
        assert!(c.user_agents.is_none());
        assert!(c.render.is_none());
        assert!(c.max_chapters.is_none());
        assert!(c.lines_per_page.is_none());
        Ok(())
    }

    #[test]
    fn parse_full_config() -> Result<(), toml::de::Error> {
        let s = r#"
            output_dir = "library"
            user_agents = ["A/1.0", "B/2.0"]
            request_delay_secs = 3
            timeout_secs = 20
            render = false
            render_timeout_secs = 45
            render_settle_secs = 2
            chrome_path = "/usr/bin/chromium"
            max_chapters = 50
            format = "markdown"
            title_match = "normalized"
            lines_per_page = 30
        "#;
        let c: Config = toml::from_str(s)?;
        assert_eq!(c.output_dir.as_deref(), Some(Path::new("library")));
        assert_eq!(
            c.user_agents,
            Some(vec!["A/1.0".to_string(), "B/2.0".to_string()])
        );
        assert_eq!(c.request_delay_secs, Some(3));
        assert_eq!(c.timeout_secs, Some(20));
        assert_eq!(c.render, Some(false));
        assert_eq!(c.render_timeout_secs, Some(45));
        assert_eq!(c.render_settle_secs, Some(2));
        assert_eq!(c.chrome_path.as_deref(), Some(Path::new("/usr/bin/chromium")));
        assert_eq!(c.max_chapters, Some(50));
        assert_eq!(c.format.as_deref(), Some("markdown"));
        assert_eq!(c.title_match.as_deref(), Some("normalized"));
        assert_eq!(c.lines_per_page, Some(30));
        Ok(())
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(toml::from_str::<Config>("output_dir = [").is_err());
        assert!(toml::from_str::<Config>("user_agent = \"typo\"").is_err());
    }

    #[test]
    fn first_existing_path_wins() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let local = dir.path().join(CONFIG_FILE_NAME);
        let global = dir.path().join("global.toml");
        std::fs::write(&global, "max_chapters = 9")?;
        let c = load_config_from(&[local.clone(), global.clone()])?.ok_or("config missing")?;
        assert_eq!(c.max_chapters, Some(9));

        std::fs::write(&local, "max_chapters = 1")?;
        let c = load_config_from(&[local, global])?.ok_or("config missing")?;
        assert_eq!(c.max_chapters, Some(1));
        Ok(())
    }

    #[test]
    fn no_files_is_none() -> Result<(), String> {
        assert!(load_config_from(&[PathBuf::from("/nonexistent/novelfetch.toml")])?.is_none());
        Ok(())
    }

    #[test]
    fn unreadable_toml_names_the_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "render = maybe")?;
        match load_config_from(&[path.clone()]) {
            Err(msg) => assert!(msg.contains(&path.display().to_string())),
            Ok(c) => return Err(format!("expected error, got {:?}", c).into()),
        }
        Ok(())
    }
}
