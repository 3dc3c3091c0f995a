// SPDX-License-Identifier: CEPL-1.0
//! `strata.toml` plus command-line overrides.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use strata_render::{RenderConfig, DEFAULT_FRAMES_IN_FLIGHT};

pub const DEFAULT_CONFIG_PATH: &str = "strata.toml";

#[derive(Parser, Debug)]
#[command(author, version, about = "Spinning cube on a Vulkan frame loop", long_about = None)]
pub struct Args {
    /// Config file. Without it, ./strata.toml is read if present.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[arg(long)]
    pub frames_in_flight: Option<usize>,
    /// Prefer MAILBOX or IMMEDIATE over FIFO.
    #[arg(long)]
    pub no_vsync: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "strata".into(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub frames_in_flight: usize,
    pub vsync: bool,
    pub clear_color: [f32; 4],
    /// 0 waits forever.
    pub fence_timeout_ms: u64,
    /// 0 waits forever.
    pub acquire_timeout_ms: u64,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            vsync: true,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            fence_timeout_ms: 5_000,
            acquire_timeout_ms: 0,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl AppCfg {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// An explicitly named file must exist; the default one may not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).with_context(|| format!("parsing {}", path.display())),
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn apply(&mut self, args: &Args) {
        if let Some(w) = args.width {
            self.window.width = w;
        }
        if let Some(h) = args.height {
            self.window.height = h;
        }
        if let Some(n) = args.frames_in_flight {
            self.render.frames_in_flight = n;
        }
        if args.no_vsync {
            self.render.vsync = false;
        }
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            frames_in_flight: self.render.frames_in_flight,
            vsync: self.render.vsync,
            clear_color: self.render.clear_color,
            fence_timeout: millis(self.render.fence_timeout_ms),
            acquire_timeout: millis(self.render.acquire_timeout_ms),
        }
    }
}
