use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::{Deserialize, Deserializer};
use std::{
    collections::{HashMap, HashSet},
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

use crate::controller::Screen;
use crate::grid;
use crate::resolver::HotspotZone;
use crate::selection::KEY_SEP;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Timing {
    pub idle_timeout_ms: u64,
    pub touch_enable_delay_ms: u64,
    pub advance_delay_ms: u64,
    pub poll_ms: u64,
}

impl Timing {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn touch_enable_delay(&self) -> Duration {
        Duration::from_millis(self.touch_enable_delay_ms)
    }

    pub fn advance_delay(&self) -> Duration {
        Duration::from_millis(self.advance_delay_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

/// Physical surface the kiosk renders on. Raw touch coordinates are
/// normalized against `raw_x_max`/`raw_y_max` and scaled to `width`/`height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Display {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_raw_max")]
    pub raw_x_max: i32,
    #[serde(default = "default_raw_max")]
    pub raw_y_max: i32,
}

fn default_raw_max() -> i32 {
    4096
}

impl Display {
    pub fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Looped media for the fixed screens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Media {
    pub idle: String,
    pub gender: String,
    pub age: String,
    pub lifestyle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CellOption {
    pub cell: u8,
    pub answer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScreenLayout {
    #[serde(default)]
    pub options: Vec<CellOption>,
    /// Successor entered automatically once the screen has settled.
    #[serde(default)]
    pub advance_to: Option<Screen>,
}

impl ScreenLayout {
    pub fn answer_at(&self, cell: u8) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.cell == cell)
            .map(|o| o.answer.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Screens {
    pub idle: ScreenLayout,
    pub gender: ScreenLayout,
    pub age: ScreenLayout,
    pub lifestyle: ScreenLayout,
}

impl Screens {
    pub fn layout(&self, screen: Screen) -> Option<&ScreenLayout> {
        match screen {
            Screen::Idle => Some(&self.idle),
            Screen::AskGender => Some(&self.gender),
            Screen::AskAge => Some(&self.age),
            Screen::AskLifestyle => Some(&self.lifestyle),
            Screen::AskRefinement | Screen::Result => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefinementLayout {
    pub arity: u8,
    /// Cell for each option; option numbers are 1-based positions in this list.
    pub cells: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefinementConfig {
    #[serde(deserialize_with = "deserialize_arity_flat")]
    pub arity: HashMap<String, u8>,
    #[serde(deserialize_with = "deserialize_strings_flat")]
    pub prompts: HashMap<String, String>,
    pub layouts: Vec<RefinementLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    pub timing: Timing,
    pub display: Display,
    pub media: Media,
    pub screens: Screens,

    // Nested tables and dotted keys both flatten to "gender.age.lifestyle[.option]"
    #[serde(deserialize_with = "deserialize_strings_flat")]
    pub results: HashMap<String, String>,

    #[serde(default)]
    pub refinement: Option<RefinementConfig>,

    #[serde(default)]
    pub hotspots: HashMap<String, Vec<HotspotZone>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("timing.{0} must be a positive duration")]
    ZeroTiming(&'static str),
    #[error("display width and height must be non-zero")]
    ZeroDisplay,
    #[error("screen '{screen}' maps cell {cell} outside its {size}x{size} grid")]
    CellOutOfGrid { screen: String, cell: u8, size: u8 },
    #[error("screen '{screen}' maps cell {cell} more than once")]
    DuplicateCell { screen: String, cell: u8 },
    #[error("answer '{0}' is empty or contains the key separator")]
    InvalidAnswer(String),
    #[error("screen '{0}' cannot auto-advance to '{1}'")]
    InvalidAdvance(String, String),
    #[error("refinement arity for '{key}' is {arity}; expected 3, 4 or 5")]
    InvalidArity { key: String, arity: u8 },
    #[error("no refinement layout for arity {0}")]
    MissingLayout(u8),
    #[error("refinement layout for arity {arity} lists {cells} distinct cells")]
    LayoutSize { arity: u8, cells: usize },
    #[error("hotspot zone on '{resource}' is outside the result grid (col={col}, rows={lo}..={hi})")]
    InvalidZone {
        resource: String,
        col: u8,
        lo: u8,
        hi: u8,
    },
}

// --------- tolerant flattening of nested lookup tables ----------
fn deserialize_strings_flat<'de, D>(
    de: D,
) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let table = table_of(de)?;
    let mut out = HashMap::new();
    flatten_table("", &table, &mut out, &|v: &toml::Value| v.as_str().map(str::to_string))
        .map_err(serde::de::Error::custom)?;
    Ok(out)
}

fn deserialize_arity_flat<'de, D>(de: D) -> std::result::Result<HashMap<String, u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let table = table_of(de)?;
    let mut out = HashMap::new();
    flatten_table("", &table, &mut out, &|v: &toml::Value| {
        v.as_integer().and_then(|n| u8::try_from(n).ok())
    })
    .map_err(serde::de::Error::custom)?;
    Ok(out)
}

fn table_of<'de, D>(de: D) -> std::result::Result<toml::value::Table, D::Error>
where
    D: Deserializer<'de>,
{
    match toml::Value::deserialize(de)? {
        toml::Value::Table(t) => Ok(t),
        other => Err(serde::de::Error::custom(format!(
            "lookup table must be a table, got {}",
            other.type_str()
        ))),
    }
}

fn flatten_table<T>(
    prefix: &str,
    table: &toml::value::Table,
    out: &mut HashMap<String, T>,
    leaf: &dyn Fn(&toml::Value) -> Option<T>,
) -> std::result::Result<(), String> {
    for (k, v) in table {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}{KEY_SEP}{k}")
        };
        if let toml::Value::Table(sub) = v {
            flatten_table(&key, sub, out, leaf)?;
            continue;
        }
        match leaf(v) {
            Some(value) => {
                out.insert(key, value);
            }
            None => {
                return Err(format!(
                    "entry '{}' has an unsupported {} value",
                    key,
                    v.type_str()
                ));
            }
        }
    }
    Ok(())
}
// ------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct KioskConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

fn config_dir() -> PathBuf {
    let home = UserDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    home.join(".config").join("kioskflow")
}

pub fn profiles_dir() -> PathBuf {
    config_dir().join("profiles")
}

fn active_ptr_path() -> PathBuf {
    config_dir().join("active")
}

const BUILTIN_PROFILES: &[(&str, &str)] = &[
    ("default", include_str!("../profiles/default.toml")),
    ("refined", include_str!("../profiles/refined.toml")),
];

impl KioskConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        let cfgdir = config_dir();
        let profdir = profiles_dir();
        fs::create_dir_all(&profdir)?;

        for (name, text) in BUILTIN_PROFILES {
            let path = profdir.join(format!("{name}.toml"));
            if !path.exists() {
                fs::write(&path, text)?;
                info!("installed built-in profile at {}", path.display());
            }
        }

        let active_ptr = active_ptr_path();
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    /// Re-reads the active profile and reports whether it differs from the
    /// one in use. On failure the last good profile stays in place.
    pub fn reload(&mut self) -> Result<bool> {
        let profile = load_profile_file(&self.active_path())?;
        if profile == self.profile {
            return Ok(false);
        }
        self.profile = profile;
        Ok(true)
    }

    /// File backing the active profile.
    pub fn active_path(&self) -> PathBuf {
        let direct = Path::new(&self.active_name);
        if direct.is_file() {
            direct.to_path_buf()
        } else {
            self.profiles_dir.join(format!("{}.toml", self.active_name))
        }
    }

    /// Whether a change to `path` can affect the active profile.
    pub fn is_active_file(&self, path: &Path) -> bool {
        let active = self.active_path();
        path.file_name().is_some_and(|n| Some(n) == active.file_name())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile_file(&p)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                if e.path().extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = e.path().file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let devices: Vec<String> = crate::input::discover_multitouch()
            .into_iter()
            .map(|d| format!("{} ({})", d.name, d.path))
            .collect();
        serde_json::json!({
            "input_dir_readable": fs::read_dir("/dev/input").is_ok(),
            "input_group_member": check_in_input_group(),
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "devices": devices,
            "hints": {
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
            }
        })
    }
}

/// Loads `<name>` from the profiles directory, or treats `name` as a path when it
/// points at an existing file.
pub fn load_profile(name: &str) -> Result<Profile> {
    let direct = Path::new(name);
    let path = if direct.is_file() {
        direct.to_path_buf()
    } else {
        profiles_dir().join(format!("{name}.toml"))
    };
    load_profile_file(&path)
}

fn load_profile_file(path: &Path) -> Result<Profile> {
    let txt = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    parse_profile(&txt).map_err(|e| anyhow!("failed to load {}: {e}", path.display()))
}

pub fn parse_profile(txt: &str) -> Result<Profile> {
    let profile: Profile = toml::from_str(txt)?;
    validate_profile(&profile)?;
    Ok(profile)
}

/// The only screen an intro screen may auto-advance to.
fn intro_successor(screen: Screen) -> Option<Screen> {
    match screen {
        Screen::Idle => Some(Screen::AskGender),
        Screen::AskGender => Some(Screen::AskAge),
        Screen::AskAge => Some(Screen::AskLifestyle),
        _ => None,
    }
}

pub fn validate_profile(p: &Profile) -> std::result::Result<(), ConfigError> {
    let t = &p.timing;
    for (name, value) in [
        ("idle_timeout_ms", t.idle_timeout_ms),
        ("touch_enable_delay_ms", t.touch_enable_delay_ms),
        ("advance_delay_ms", t.advance_delay_ms),
        ("poll_ms", t.poll_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::ZeroTiming(name));
        }
    }
    if p.display.width == 0 || p.display.height == 0 {
        return Err(ConfigError::ZeroDisplay);
    }

    let question_size = grid::grid_size(Screen::Idle);
    for screen in [
        Screen::Idle,
        Screen::AskGender,
        Screen::AskAge,
        Screen::AskLifestyle,
    ] {
        let Some(layout) = p.screens.layout(screen) else {
            continue;
        };
        let mut seen = HashSet::new();
        for o in &layout.options {
            if o.cell >= question_size * question_size {
                return Err(ConfigError::CellOutOfGrid {
                    screen: screen.to_string(),
                    cell: o.cell,
                    size: question_size,
                });
            }
            if !seen.insert(o.cell) {
                return Err(ConfigError::DuplicateCell {
                    screen: screen.to_string(),
                    cell: o.cell,
                });
            }
            if o.answer.is_empty() || o.answer.contains(KEY_SEP) {
                return Err(ConfigError::InvalidAnswer(o.answer.clone()));
            }
        }
        if let Some(next) = layout.advance_to {
            if intro_successor(screen) != Some(next) {
                return Err(ConfigError::InvalidAdvance(
                    screen.to_string(),
                    next.to_string(),
                ));
            }
        }
    }

    if let Some(r) = &p.refinement {
        for (key, &arity) in &r.arity {
            if !(3..=5).contains(&arity) {
                return Err(ConfigError::InvalidArity {
                    key: key.clone(),
                    arity,
                });
            }
            if !r.layouts.iter().any(|l| l.arity == arity) {
                return Err(ConfigError::MissingLayout(arity));
            }
        }
        for l in &r.layouts {
            let distinct: HashSet<u8> = l.cells.iter().copied().collect();
            if distinct.len() != l.arity as usize || l.cells.len() != l.arity as usize {
                return Err(ConfigError::LayoutSize {
                    arity: l.arity,
                    cells: distinct.len(),
                });
            }
            if let Some(&cell) = l.cells.iter().find(|&&c| c >= question_size * question_size) {
                return Err(ConfigError::CellOutOfGrid {
                    screen: Screen::AskRefinement.to_string(),
                    cell,
                    size: question_size,
                });
            }
        }
    }

    let result_size = grid::grid_size(Screen::Result);
    for (resource, zones) in &p.hotspots {
        for z in zones {
            let (lo, hi) = z.rows;
            let ok = (1..=result_size).contains(&z.col)
                && lo >= 1
                && lo <= hi
                && hi <= result_size;
            if !ok {
                return Err(ConfigError::InvalidZone {
                    resource: resource.clone(),
                    col: z.col,
                    lo,
                    hi,
                });
            }
        }
    }
    Ok(())
}

fn check_in_input_group() -> bool {
    if let Ok(s) = fs::read_to_string("/etc/group") {
        let user = whoami::username();
        for line in s.lines() {
            if line.starts_with("input:") {
                if line
                    .split(':')
                    .nth(3)
                    .unwrap_or("")
                    .split(',')
                    .any(|u| u == user)
                {
                    return true;
                }
            }
        }
    }
    false
}
