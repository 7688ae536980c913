use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default)]
    pub to: To,
    #[serde(default)]
    pub level: Level,
    #[serde(default = "Log::dir_default")]
    pub dir: String,
    #[serde(default = "Log::file_default")]
    pub file: String,
}

impl Default for Log {
    #[inline]
    fn default() -> Self {
        Self { to: To::default(), level: Level::default(), dir: Self::dir_default(), file: Self::file_default() }
    }
}

impl Log {
    fn dir_default() -> String {
        "/var/log/rbroker".into()
    }

    fn file_default() -> String {
        "rbroker.log".into()
    }

    /// Full path of the log file, empty when no file is configured
    pub fn filename(&self) -> String {
        if self.file.is_empty() {
            return String::new();
        }
        match self.dir.trim_end_matches(['/', '\\']) {
            "" => self.file.clone(),
            dir => format!("{dir}/{}", self.file),
        }
    }
}

/// Log output target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum To {
    Off,
    File,
    #[default]
    Console,
    Both,
}

impl To {
    #[inline]
    pub fn file(&self) -> bool {
        matches!(self, To::Both | To::File)
    }

    #[inline]
    pub fn console(&self) -> bool {
        matches!(self, To::Both | To::Console)
    }

    #[inline]
    pub fn off(&self) -> bool {
        matches!(self, To::Off)
    }
}

impl<'de> Deserialize<'de> for To {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let to = String::deserialize(deserializer)?;
        match to.to_ascii_lowercase().as_str() {
            "off" => Ok(To::Off),
            "file" => Ok(To::File),
            "console" => Ok(To::Console),
            "both" => Ok(To::Both),
            _ => Err(de::Error::custom(format!("unknown log target `{to}`, expected off, file, console or both"))),
        }
    }
}

/// Minimum slog level that is written
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Level(slog::Level);

impl Level {
    #[inline]
    pub fn inner(&self) -> slog::Level {
        self.0
    }
}

impl Default for Level {
    fn default() -> Self {
        Level(slog::Level::Info)
    }
}

impl Deref for Level {
    type Target = slog::Level;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level = String::deserialize(deserializer)?;
        slog::Level::from_str(&level)
            .map(Level)
            .map_err(|_| de::Error::custom(format!("unknown log level `{level}`")))
    }
}
