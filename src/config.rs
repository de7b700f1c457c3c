use anyhow::{anyhow, Context};
use log::LevelFilter;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::mpsc::{self, Receiver},
};

pub const CONFIG_FILE_NAME: &str = "lyric_overlay.toml";
pub const CONFIG_ENV_VAR: &str = "LYRIC_OVERLAY_CONFIG";

pub const MIN_FONT_SIZE: f32 = 8.0;
pub const MAX_FONT_SIZE: f32 = 200.0;
pub const MAX_STROKE_WIDTH: f32 = 8.0;

/// Presentation settings plus the last known window width.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub font_size: f32,
    pub font_color: String,
    pub stroke_color: String,
    pub stroke_width: f32,
    pub bg_opacity: f32,
    pub text_opacity: f32,
    /// Zero means the width has never been recorded.
    pub window_width: f32,
    pub font_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            font_size: 32.0,
            font_color: "#FFFFFF".to_string(),
            stroke_color: "#000000".to_string(),
            stroke_width: 1.0,
            bg_opacity: 0.4,
            text_opacity: 1.0,
            window_width: 0.0,
            font_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn sanitized(mut self) -> Self {
        self.font_size = clamp_or(self.font_size, MIN_FONT_SIZE, MAX_FONT_SIZE, 32.0);
        self.stroke_width = clamp_or(self.stroke_width, 0.0, MAX_STROKE_WIDTH, 1.0);
        self.bg_opacity = clamp_or(self.bg_opacity, 0.0, 1.0, 0.4);
        self.text_opacity = clamp_or(self.text_opacity, 0.0, 1.0, 1.0);
        self.set_window_width(self.window_width);
        self
    }

    pub fn set_window_width(&mut self, width: f32) {
        self.window_width = if width.is_finite() {
            width.max(0.0)
        } else {
            0.0
        };
    }

    pub fn has_window_width(&self) -> bool {
        self.window_width > 0.0
    }

    pub fn log_filter(&self) -> LevelFilter {
        LevelFilter::from_str(self.log_level.trim()).unwrap_or(LevelFilter::Info)
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// Locates, reads and writes the TOML config file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn discover() -> Self {
        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Self::at(path);
            }
        }

        let mut candidates = Vec::new();

        if let Ok(current_dir) = env::current_dir() {
            candidates.push(current_dir.join(CONFIG_FILE_NAME));
            candidates.push(current_dir.join("config").join(CONFIG_FILE_NAME));
        }

        if let Ok(exe) = env::current_exe() {
            if let Some(dir) = exe.parent() {
                candidates.push(dir.join(CONFIG_FILE_NAME));
                candidates.push(dir.join("config").join(CONFIG_FILE_NAME));
            }
        }

        candidates
            .into_iter()
            .find(|path| path.exists())
            .map(Self::at)
            .unwrap_or_else(|| Self::at(CONFIG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file yields the defaults.
    pub fn load(&self) -> anyhow::Result<AppConfig> {
        if !self.path.exists() {
            return Ok(AppConfig::default());
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config file: {}", self.path.display()))?;
        let doc: ConfigDocument = toml::from_str(&data)
            .with_context(|| format!("Failed to parse config: {}", self.path.display()))?;
        Ok(AppConfig::from(doc).sanitized())
    }

    pub fn save(&self, config: &AppConfig) -> anyhow::Result<()> {
        let doc = ConfigDocument::from(config);
        let data = toml::to_string_pretty(&doc).context("Failed to serialize config")?;

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, data)
            .with_context(|| format!("Failed to write config file: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace config file: {}", self.path.display()))?;

        log::debug!("Saved config to {}", self.path.display());
        Ok(())
    }

    pub fn watch(&self) -> anyhow::Result<ConfigWatcher> {
        ConfigWatcher::new(&self.path)
    }
}

/// Reports edits made to the config file by other programs (or by us).
pub struct ConfigWatcher {
    file_name: std::ffi::OsString,
    _watcher: RecommendedWatcher,
    changes_rx: Receiver<notify::Result<notify::Event>>,
}

impl ConfigWatcher {
    fn new(path: &Path) -> anyhow::Result<Self> {
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("Config path has no file name: {}", path.display()))?
            .to_os_string();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            return Err(anyhow!("Config directory {} does not exist", dir.display()));
        }

        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;

        Ok(Self {
            file_name,
            _watcher: watcher,
            changes_rx: rx,
        })
    }

    /// Drains pending events; true when any of them touched the config file.
    pub fn poll_changed(&self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.changes_rx.try_recv() {
            match event {
                Ok(evt) => {
                    if !matches!(evt.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        continue;
                    }
                    if evt
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(self.file_name.as_os_str()))
                    {
                        changed = true;
                    }
                }
                Err(err) => log::warn!("Config watcher error: {err}"),
            }
        }
        changed
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ConfigDocument {
    #[serde(default)]
    appearance: AppearanceSection,
    #[serde(default)]
    window: WindowSection,
    #[serde(default)]
    logging: LoggingSection,
}

impl From<ConfigDocument> for AppConfig {
    fn from(value: ConfigDocument) -> Self {
        let defaults = AppConfig::default();
        let appearance = value.appearance;
        AppConfig {
            font_size: appearance.font_size.unwrap_or(defaults.font_size),
            font_color: appearance.font_color.unwrap_or(defaults.font_color),
            stroke_color: appearance.stroke_color.unwrap_or(defaults.stroke_color),
            stroke_width: appearance.stroke_width.unwrap_or(defaults.stroke_width),
            bg_opacity: appearance.bg_opacity.unwrap_or(defaults.bg_opacity),
            text_opacity: appearance.text_opacity.unwrap_or(defaults.text_opacity),
            window_width: value.window.width.unwrap_or(defaults.window_width),
            font_path: appearance.font_path.or(defaults.font_path),
            log_level: value.logging.level.unwrap_or(defaults.log_level),
        }
    }
}

impl From<&AppConfig> for ConfigDocument {
    fn from(value: &AppConfig) -> Self {
        ConfigDocument {
            appearance: AppearanceSection {
                font_size: Some(value.font_size),
                font_color: Some(value.font_color.clone()),
                stroke_color: Some(value.stroke_color.clone()),
                stroke_width: Some(value.stroke_width),
                bg_opacity: Some(value.bg_opacity),
                text_opacity: Some(value.text_opacity),
                font_path: value.font_path.clone(),
            },
            window: WindowSection {
                width: Some(value.window_width),
            },
            logging: LoggingSection {
                level: Some(value.log_level.clone()),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct AppearanceSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    font_size: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    font_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stroke_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stroke_width: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bg_opacity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_opacity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    font_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct WindowSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<f32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct LoggingSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        env::temp_dir()
            .join(format!("lyric_overlay_{name}_{}_{nanos}", std::process::id()))
            .join(CONFIG_FILE_NAME)
    }

    #[test]
    fn partial_document_falls_back_to_defaults() {
        let doc: ConfigDocument = toml::from_str(
            r##"
            [appearance]
            font_size = 48
            font_color = "#FFCC00"
            "##,
        )
        .unwrap();
        let config = AppConfig::from(doc).sanitized();

        assert_eq!(config.font_size, 48.0);
        assert_eq!(config.font_color, "#FFCC00");
        assert_eq!(config.stroke_color, "#000000");
        assert_eq!(config.window_width, 0.0);
        assert!(!config.has_window_width());
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let config = AppConfig {
            font_size: -4.0,
            bg_opacity: 3.0,
            text_opacity: f32::NAN,
            stroke_width: 100.0,
            window_width: -20.0,
            ..AppConfig::default()
        }
        .sanitized();

        assert_eq!(config.font_size, MIN_FONT_SIZE);
        assert_eq!(config.bg_opacity, 1.0);
        assert_eq!(config.text_opacity, 1.0);
        assert_eq!(config.stroke_width, MAX_STROKE_WIDTH);
        assert_eq!(config.window_width, 0.0);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let store = ConfigStore::at(scratch_path("missing"));
        assert_eq!(store.load().unwrap(), AppConfig::default());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let path = scratch_path("save");
        let store = ConfigStore::at(&path);
        let config = AppConfig {
            font_size: 40.0,
            font_color: "#00FF88".to_string(),
            window_width: 912.0,
            font_path: Some(PathBuf::from("fonts/NotoSansSC-Bold.otf")),
            log_level: "debug".to_string(),
            ..AppConfig::default()
        };

        store.save(&config).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.log_filter(), LevelFilter::Debug);

        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn malformed_file_reports_path() {
        let path = scratch_path("malformed");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[appearance\nfont_size = ").unwrap();

        let err = ConfigStore::at(&path).load().unwrap_err();
        assert!(format!("{err}").contains("Failed to parse config"));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn watcher_sees_writes_to_the_config_file() {
        let path = scratch_path("watch");
        let dir = path.parent().unwrap().to_path_buf();
        fs::create_dir_all(&dir).unwrap();
        let watcher = ConfigStore::at(&path).watch().unwrap();
        assert!(!watcher.poll_changed());

        fs::write(dir.join("unrelated.txt"), "x").unwrap();
        fs::write(&path, "[appearance]\nfont_size = 40\n").unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut changed = false;
        while !changed && std::time::Instant::now() < deadline {
            changed = watcher.poll_changed();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(changed);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn watching_a_missing_directory_fails() {
        assert!(ConfigStore::at(scratch_path("nowhere")).watch().is_err());
    }

    #[test]
    fn unknown_log_level_defaults_to_info() {
        let config = AppConfig {
            log_level: "chatty".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.log_filter(), LevelFilter::Info);
    }
}
