// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use screll_render::{PresentPreference, RendererSettings};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Upper bound for frames in flight, from the CLI or the file.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 8;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path of the TOML configuration file
    #[arg(long, default_value = "screll.toml")]
    pub config: PathBuf,

    /// Override [render].present_mode
    #[arg(long, value_enum)]
    pub present_mode: Option<PresentArg>,

    /// Override [render].frames_in_flight
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_FRAMES_IN_FLIGHT)))]
    pub frames_in_flight: Option<u32>,

    /// Enable the Khronos validation layer
    #[arg(long, overrides_with = "no_validation")]
    pub validation: bool,

    /// Disable the Khronos validation layer
    #[arg(long, overrides_with = "validation")]
    pub no_validation: bool,
}

impl Args {
    fn validation(&self) -> Option<bool> {
        match (self.validation, self.no_validation) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PresentArg {
    Fifo,
    Mailbox,
}

impl From<PresentArg> for PresentPreference {
    fn from(arg: PresentArg) -> Self {
        match arg {
            PresentArg::Fifo => PresentPreference::Fifo,
            PresentArg::Mailbox => PresentPreference::Mailbox,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub shaders: ShaderCfg,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "screll".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_mode: PresentPreference,
    pub frames_in_flight: usize,
    /// Unset means "on in debug builds".
    pub validation: Option<bool>,
    pub log_filter: String,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let base = RendererSettings::default();
        Self {
            clear_color: base.clear_color,
            present_mode: base.present,
            frames_in_flight: base.frames_in_flight,
            validation: None,
            log_filter: "info".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShaderCfg {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderCfg {
    fn default() -> Self {
        // Set by build.rs when the bundled shaders are compiled.
        let dir = Path::new(option_env!("SCRELL_SHADER_DIR").unwrap_or("shaders"));
        Self {
            vertex: dir.join("triangle.vert.spv"),
            fragment: dir.join("triangle.frag.spv"),
        }
    }
}

impl AppConfig {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// A missing file yields the defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn renderer_settings(&self, args: &Args) -> RendererSettings {
        let base = RendererSettings::default();
        let requested = args
            .frames_in_flight
            .map(|n| n as usize)
            .unwrap_or(self.render.frames_in_flight);
        let frames_in_flight = requested.clamp(1, MAX_FRAMES_IN_FLIGHT as usize);
        if frames_in_flight != requested {
            warn!("frames_in_flight = {requested} is out of range, using {frames_in_flight}");
        }
        RendererSettings {
            app_name: self.window.title.clone(),
            present: args
                .present_mode
                .map(PresentPreference::from)
                .unwrap_or(self.render.present_mode),
            frames_in_flight,
            validation: args
                .validation()
                .or(self.render.validation)
                .unwrap_or(base.validation),
            clear_color: self.render.clear_color,
            vertex_shader: self.shaders.vertex.clone(),
            fragment_shader: self.shaders.fragment.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("screll").chain(extra.iter().copied())).unwrap()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.render.present_mode, PresentPreference::Mailbox);
        assert_eq!(cfg.render.log_filter, "info");
        assert!(cfg.shaders.vertex.ends_with("triangle.vert.spv"));
    }

    #[test]
    fn full_file_is_honoured() {
        let cfg = AppConfig::parse(
            r#"
            [window]
            title = "demo"
            width = 640
            height = 480

            [render]
            clear_color = [1.0, 0.5, 0.25, 1.0]
            present_mode = "fifo"
            frames_in_flight = 3
            validation = false
            log_filter = "screll=debug,vulkan=warn"

            [shaders]
            vertex = "a.spv"
            fragment = "b.spv"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "demo");
        assert_eq!((cfg.window.width, cfg.window.height), (640, 480));
        assert_eq!(cfg.render.clear_color, [1.0, 0.5, 0.25, 1.0]);
        assert_eq!(cfg.render.present_mode, PresentPreference::Fifo);
        assert_eq!(cfg.render.validation, Some(false));
        assert_eq!(cfg.shaders.fragment, PathBuf::from("b.spv"));

        let s = cfg.renderer_settings(&args(&[]));
        assert_eq!(s.app_name, "demo");
        assert_eq!(s.frames_in_flight, 3);
        assert!(!s.validation);
        assert_eq!(s.vertex_shader, PathBuf::from("a.spv"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = AppConfig::parse("[render]\npresent_mode = \"fifo\"\n").unwrap();
        assert_eq!(cfg.render.present_mode, PresentPreference::Fifo);
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.window.title, "screll");
    }

    #[test]
    fn malformed_files_are_rejected() {
        assert!(AppConfig::parse("[render]\npresent_mode = \"immediate\"\n").is_err());
        assert!(AppConfig::parse("[render]\nframes_in_flight = -1\n").is_err());
        assert!(AppConfig::parse("[window\n").is_err());
        assert!(AppConfig::parse("[render]\nvsync = true\n").is_err());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let cfg = AppConfig::load(Path::new("no/such/dir/screll.toml")).unwrap();
        assert_eq!(cfg.window.height, 720);
    }

    #[test]
    fn cli_overrides_file() {
        let cfg = AppConfig::parse("[render]\npresent_mode = \"mailbox\"\nvalidation = true\n").unwrap();
        let s = cfg.renderer_settings(&args(&[
            "--present-mode",
            "fifo",
            "--frames-in-flight",
            "1",
            "--no-validation",
        ]));
        assert_eq!(s.present, PresentPreference::Fifo);
        assert_eq!(s.frames_in_flight, 1);
        assert!(!s.validation);
    }

    #[test]
    fn validation_flags_last_one_wins() {
        assert_eq!(args(&["--validation"]).validation(), Some(true));
        assert_eq!(args(&["--no-validation"]).validation(), Some(false));
        assert_eq!(args(&["--no-validation", "--validation"]).validation(), Some(true));
        assert_eq!(args(&["--validation", "--no-validation"]).validation(), Some(false));
        assert_eq!(args(&[]).validation(), None);
    }

    #[test]
    fn frames_in_flight_flag_is_bounded() {
        assert!(Args::try_parse_from(["screll", "--frames-in-flight", "0"]).is_err());
        assert!(Args::try_parse_from(["screll", "--frames-in-flight", "9"]).is_err());
    }

    #[test]
    fn zero_frames_in_flight_in_file_is_clamped() {
        let cfg = AppConfig::parse("[render]\nframes_in_flight = 0\n").unwrap();
        assert_eq!(cfg.renderer_settings(&args(&[])).frames_in_flight, 1);
    }

    #[cfg(feature = "compile-shaders")]
    #[test]
    fn default_shader_paths_point_at_compiled_binaries() {
        let shaders = ShaderCfg::default();
        assert!(shaders.vertex.is_file());
        assert!(shaders.fragment.is_file());
    }

    #[test]
    fn oversized_frames_in_flight_in_file_is_capped() {
        let cfg = AppConfig::parse("[render]\nframes_in_flight = 10000\n").unwrap();
        assert_eq!(
            cfg.renderer_settings(&args(&[])).frames_in_flight,
            MAX_FRAMES_IN_FLIGHT as usize
        );
        let cfg = AppConfig::parse("[render]\nframes_in_flight = 8\n").unwrap();
        assert_eq!(cfg.renderer_settings(&args(&[])).frames_in_flight, 8);
    }
}
