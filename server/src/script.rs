//! Scripted event streams.
//!
//! A script is a JSON-lines file, one step per line:
//! `{"delayMs": 500, "event": {"event": "state", "data": {...}}}`. Blank lines
//! and lines starting with `//` are skipped. Every event is checked against
//! the protocol schema at load time so a typo fails the relay on start rather
//! than the overlay at runtime.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tableside_protocol::ServerEvent;
use thiserror::Error;
use tracing::{debug, info};

/// Script used for channels without a file of their own.
pub const DEFAULT_SCRIPT: &str = "default";

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("fixtures {path}: {source}")]
    Fixtures {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}:{line}: event data must be an object")]
    NotAnObject { path: PathBuf, line: usize },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    #[serde(default)]
    delay_ms: u64,
    event: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub delay: Duration,
    /// The envelope as written; the channel is filled in at send time.
    pub event: Value,
    pub name: &'static str,
}

impl Step {
    /// Encode for `channel`, adding the channel when the script left it out.
    pub fn frame_for(&self, channel: &str) -> String {
        let mut event = self.event.clone();
        if let Some(data) = event.get_mut("data").and_then(Value::as_object_mut) {
            data.entry("channel").or_insert_with(|| Value::String(channel.to_string()));
        }
        event.to_string()
    }

    /// Snapshots are kept for overlays that join mid-script.
    pub fn is_snapshot(&self) -> bool {
        matches!(self.name, "state" | "roundStarted")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub steps: Vec<Step>,
}

impl Script {
    pub fn parse(path: &Path, text: &str) -> Result<Self, ScriptError> {
        let mut steps = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            let parse_err = |source| ScriptError::Parse {
                path: path.to_path_buf(),
                line: line_no,
                source,
            };
            let raw: RawStep = serde_json::from_str(trimmed).map_err(parse_err)?;
            let mut event = raw.event;
            match event.get_mut("data") {
                Some(Value::Object(_)) => {}
                None => {
                    if let Some(obj) = event.as_object_mut() {
                        obj.insert("data".into(), Value::Object(Default::default()));
                    }
                }
                Some(_) => {
                    return Err(ScriptError::NotAnObject {
                        path: path.to_path_buf(),
                        line: line_no,
                    })
                }
            }
            let typed: ServerEvent = serde_json::from_value(event.clone()).map_err(parse_err)?;
            steps.push(Step {
                delay: Duration::from_millis(raw.delay_ms),
                event,
                name: typed.name(),
            });
        }
        Ok(Self { steps })
    }

    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Scripts keyed by channel, from `<channel>.jsonl` files in one directory.
#[derive(Debug, Clone, Default)]
pub struct ScriptLibrary {
    scripts: HashMap<String, Script>,
}

impl ScriptLibrary {
    pub fn from_dir(dir: &Path) -> Result<Self, ScriptError> {
        let io_err = |source| ScriptError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut scripts = HashMap::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(channel) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let script = Script::load(&path)?;
            debug!(channel, steps = script.steps.len(), "script loaded");
            scripts.insert(channel.to_lowercase(), script);
        }
        info!(dir = %dir.display(), scripts = scripts.len(), "script library ready");
        Ok(Self { scripts })
    }

    pub fn insert(&mut self, channel: &str, script: Script) {
        self.scripts.insert(channel.to_lowercase(), script);
    }

    /// The channel's own script, or the default one.
    pub fn for_channel(&self, channel: &str) -> Option<&Script> {
        self.scripts.get(channel).or_else(|| self.scripts.get(DEFAULT_SCRIPT))
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
