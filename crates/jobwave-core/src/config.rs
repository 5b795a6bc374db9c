//! Run configuration that downstream crates can serialize/deserialize.
//!
//! Every switch that changes compilation (the combiner toggle, the chunk-size
//! hint) lives here and is passed explicitly into the compiler. Nothing in the
//! compile path reads process environment; `from_env` is for binaries only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const KEY_LAST_INPUT_CHUNK_SIZE: &str = "last.input.chunksize";
pub const KEY_DISABLE_COMBINER: &str = "exec.nocombiner";
pub const KEY_POLL_INTERVAL_MS: &str = "exec.poll.interval.ms";
pub const KEY_TEMP_DIR: &str = "exec.temp.dir";
pub const KEY_JOB_TRACKER: &str = "cluster.job.tracker";
pub const KEY_DEFAULT_FS: &str = "cluster.default.fs";
pub const KEY_QUEUE: &str = "cluster.queue";
pub const KEY_DEFAULT_PARALLELISM: &str = "cluster.default.parallelism";

/// Default number of tuples a streaming join package holds per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Chunk-size hint shared by the combiner and the last-input join streaming pass.
    pub last_input_chunk_size: usize,

    /// When set, no combine phase is ever inserted.
    pub disable_combiner: bool,

    /// Sleep between completion polls while a wave is running.
    pub poll_interval_ms: u64,

    /// Root for temporary (inter-job) outputs and staging directories.
    pub temp_dir: String,

    pub cluster: ClusterConfig,

    /// Extra properties passed through verbatim into every job snapshot.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Connection parameters for the execution substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub job_tracker: Option<String>,
    pub default_fs: Option<String>,
    pub queue: Option<String>,
    /// Reduce parallelism for shuffling nodes.
    pub default_parallelism: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            job_tracker: None,
            default_fs: None,
            queue: None,
            default_parallelism: 1,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            last_input_chunk_size: DEFAULT_CHUNK_SIZE,
            disable_combiner: false,
            poll_interval_ms: 500,
            temp_dir: "/tmp/jobwave".to_string(),
            cluster: ClusterConfig::default(),
            properties: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Build config from env vars (optional). Unknown or unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("JOBWAVE_LAST_INPUT_CHUNKSIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.last_input_chunk_size = v;
            }
        }

        if let Ok(s) = std::env::var("JOBWAVE_NO_COMBINER") {
            cfg.disable_combiner = parse_bool(&s).unwrap_or(false);
        }

        if let Ok(s) = std::env::var("JOBWAVE_POLL_INTERVAL_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.poll_interval_ms = v;
            }
        }

        if let Ok(s) = std::env::var("JOBWAVE_TEMP_DIR") {
            cfg.temp_dir = s;
        }

        if let Ok(s) = std::env::var("JOBWAVE_JOB_TRACKER") {
            cfg.cluster.job_tracker = Some(s);
        }

        if let Ok(s) = std::env::var("JOBWAVE_DEFAULT_FS") {
            cfg.cluster.default_fs = Some(s);
        }

        if let Ok(s) = std::env::var("JOBWAVE_QUEUE") {
            cfg.cluster.queue = Some(s);
        }

        if let Ok(s) = std::env::var("JOBWAVE_DEFAULT_PARALLELISM") {
            if let Ok(v) = s.parse::<u32>() {
                cfg.cluster.default_parallelism = v;
            }
        }

        cfg
    }

    /// Build config from a flat property map. Recognized keys are parsed
    /// strictly; everything else is carried through in `properties`.
    pub fn from_properties(props: &BTreeMap<String, String>) -> Result<Self> {
        let mut cfg = Self::default();
        for (key, value) in props {
            match key.as_str() {
                KEY_LAST_INPUT_CHUNK_SIZE => {
                    cfg.last_input_chunk_size = parse_num(key, value)?;
                }
                KEY_DISABLE_COMBINER => {
                    cfg.disable_combiner = parse_bool(value).ok_or_else(|| {
                        Error::Config(format!("{key}: expected true/false, got '{value}'"))
                    })?;
                }
                KEY_POLL_INTERVAL_MS => cfg.poll_interval_ms = parse_num(key, value)?,
                KEY_TEMP_DIR => cfg.temp_dir = value.clone(),
                KEY_JOB_TRACKER => cfg.cluster.job_tracker = Some(value.clone()),
                KEY_DEFAULT_FS => cfg.cluster.default_fs = Some(value.clone()),
                KEY_QUEUE => cfg.cluster.queue = Some(value.clone()),
                KEY_DEFAULT_PARALLELISM => {
                    cfg.cluster.default_parallelism = parse_num(key, value)?;
                }
                _ => {
                    cfg.properties.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(cfg)
    }

    /// Reject settings no launch can run with.
    pub fn validate(&self) -> Result<()> {
        if self.last_input_chunk_size == 0 {
            return Err(Error::Config(format!(
                "{KEY_LAST_INPUT_CHUNK_SIZE} must be positive"
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(format!(
                "{KEY_POLL_INTERVAL_MS} must be positive"
            )));
        }
        if self.cluster.default_parallelism == 0 {
            return Err(Error::Config(format!(
                "{KEY_DEFAULT_PARALLELISM} must be positive"
            )));
        }
        if self.temp_dir.trim().is_empty() {
            return Err(Error::Config(format!("{KEY_TEMP_DIR} must not be empty")));
        }
        Ok(())
    }

    /// Flatten into the property form jobs receive. Built-in keys win over
    /// pass-through properties of the same name.
    pub fn to_properties(&self) -> BTreeMap<String, String> {
        let mut out = self.properties.clone();
        out.insert(
            KEY_LAST_INPUT_CHUNK_SIZE.into(),
            self.last_input_chunk_size.to_string(),
        );
        out.insert(KEY_DISABLE_COMBINER.into(), self.disable_combiner.to_string());
        out.insert(KEY_POLL_INTERVAL_MS.into(), self.poll_interval_ms.to_string());
        out.insert(KEY_TEMP_DIR.into(), self.temp_dir.clone());
        if let Some(jt) = &self.cluster.job_tracker {
            out.insert(KEY_JOB_TRACKER.into(), jt.clone());
        }
        if let Some(fs) = &self.cluster.default_fs {
            out.insert(KEY_DEFAULT_FS.into(), fs.clone());
        }
        if let Some(q) = &self.cluster.queue {
            out.insert(KEY_QUEUE.into(), q.clone());
        }
        out.insert(
            KEY_DEFAULT_PARALLELISM.into(),
            self.cluster.default_parallelism.to_string(),
        );
        out
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            properties: self.to_properties(),
        }
    }
}

/// Resolved, read-only property set handed to one job.
///
/// Built once by the wave compiler and frozen behind an `Arc` for the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    properties: BTreeMap<String, String>,
}

impl ConfigSnapshot {
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.properties.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(parse_bool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{key}: expected a number, got '{value}'")))
}
