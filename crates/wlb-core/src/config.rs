use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow,
  bail
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::store::{
  Backend,
  RemoteConfig
};
use crate::view::{
  CategoryFilter,
  ViewFilter,
  ViewMode
};

pub const RC_ENV_VAR: &str = "WLBRC";
const DEFAULT_SNOOZE_MINUTES: i64 = 15;
const DEFAULT_DATA_LOCATION: &str = "~/.wlb";
const MAX_INCLUDE_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (k, v) in [
      ("data.location", DEFAULT_DATA_LOCATION),
      ("store.backend", "local"),
      ("color", "on"),
      ("snooze.minutes", "15"),
      ("default.view", "today"),
      ("default.category", "all")
    ] {
      map.insert(
        k.to_string(),
        v.to_string()
      );
    }
    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();
    match resolve_rc_path(rc_override) {
      | Some(path) => {
        let path = expand_tilde(&path);
        info!(rc = %path.display(), "loading wlbrc");
        cfg.load_file(&path, 0)?;
      }
      | None => {
        debug!("no wlbrc; using defaults");
      }
    }
    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn backend(
    &self
  ) -> anyhow::Result<Backend> {
    let raw = self
      .get("store.backend")
      .unwrap_or_default();
    raw.parse::<Backend>().map_err(
      anyhow::Error::from
    )
  }

  pub fn remote(
    &self
  ) -> anyhow::Result<RemoteConfig> {
    let url = self
      .get("remote.url")
      .unwrap_or_default();
    let key = self
      .get("remote.anon_key")
      .unwrap_or_default();
    RemoteConfig::new(url, key)
      .context(
        "store.backend = remote needs \
         remote.url and \
         remote.anon_key"
      )
  }

  pub fn snooze_minutes(&self) -> i64 {
    match self
      .get("snooze.minutes")
      .map(|raw| {
        raw.trim().parse::<i64>()
      }) {
      | Some(Ok(minutes))
        if minutes > 0 =>
      {
        minutes
      }
      | Some(_) => {
        warn!(
          "invalid snooze.minutes; \
           using default"
        );
        DEFAULT_SNOOZE_MINUTES
      }
      | None => DEFAULT_SNOOZE_MINUTES
    }
  }

  /// View selection used when a command gives none.
  pub fn default_view(
    &self
  ) -> anyhow::Result<ViewFilter> {
    let mode = self
      .get("default.view")
      .map(|raw| raw.parse::<ViewMode>())
      .transpose()?
      .unwrap_or_default();
    let category = self
      .get("default.category")
      .map(|raw| {
        raw.parse::<CategoryFilter>()
      })
      .transpose()?
      .unwrap_or_default();
    Ok(ViewFilter::new(mode, category))
  }

  /// Reads one rc file into the map. `include` lines pull in further
  /// files relative to the including file.
  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path,
    depth: usize
  ) -> anyhow::Result<()> {
    if depth > MAX_INCLUDE_DEPTH {
      bail!(
        "includes nested more than \
         {MAX_INCLUDE_DEPTH} deep at {}",
        path.display()
      );
    }

    let text = fs::read_to_string(path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
    self
      .loaded_files
      .push(path.to_path_buf());
    let base_dir = path
      .parent()
      .unwrap_or(Path::new("."));

    for (idx, raw) in
      text.lines().enumerate()
    {
      let parsed = parse_rc_line(raw)
        .with_context(|| {
          format!(
            "{}:{}",
            path.display(),
            idx + 1
          )
        })?;
      match parsed {
        | None => {}
        | Some(RcLine::Set(key, value)) => {
          trace!(key, "loaded config key");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
        | Some(RcLine::Include(target)) => {
          let target = base_dir.join(
            expand_tilde(Path::new(target))
          );
          if target.is_file() {
            self
              .load_file(&target, depth + 1)?;
          } else {
            warn!(include = %target.display(), "included rc file not found; skipping");
          }
        }
      }
    }

    Ok(())
  }
}

/// A meaningful rc line; blanks and comments parse to `None`.
#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Set(&'a str, &'a str),
  Include(&'a str)
}

fn parse_rc_line(
  raw: &str
) -> anyhow::Result<Option<RcLine<'_>>> {
  let line = raw
    .split('#')
    .next()
    .unwrap_or_default()
    .trim();
  if line.is_empty() {
    return Ok(None);
  }

  if let Some(target) =
    line.strip_prefix("include ")
  {
    let target = target.trim();
    if target.is_empty() {
      bail!("include needs a path");
    }
    return Ok(Some(RcLine::Include(
      target
    )));
  }

  let (key, value) = line
    .split_once('=')
    .ok_or_else(|| {
      anyhow!(
        "expected `key = value`, got \
         `{line}`"
      )
    })?;
  let key = key.trim();
  if key.is_empty() {
    bail!("missing key before `=`");
  }
  Ok(Some(RcLine::Set(
    key,
    value.trim()
  )))
}

/// The directory holding the store, session and theme files; created on
/// first use.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    | Some(path) => path.to_path_buf(),
    | None => {
      let raw = cfg
        .get("data.location")
        .unwrap_or_else(|| {
          DEFAULT_DATA_LOCATION
            .to_string()
        });
      expand_tilde(Path::new(&raw))
    }
  };

  fs::create_dir_all(&dir)
    .with_context(|| {
      format!(
        "failed to create {}",
        dir.display()
      )
    })?;
  debug!(dir = %dir.display(), "using data directory");
  Ok(dir)
}

/// `--wlbrc`, then `$WLBRC` (empty means none), then `~/.wlbrc` if present.
fn resolve_rc_path(
  override_path: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = override_path {
    return Some(path.to_path_buf());
  }

  match std::env::var_os(RC_ENV_VAR) {
    | Some(raw) if raw.is_empty() => {
      None
    }
    | Some(raw) => {
      Some(PathBuf::from(raw))
    }
    | None => dirs::home_dir()
      .map(|home| home.join(".wlbrc"))
      .filter(|path| path.is_file())
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  match (
    path.strip_prefix("~"),
    dirs::home_dir()
  ) {
    | (Ok(rest), Some(home)) => {
      home.join(rest)
    }
    | _ => path.to_path_buf()
  }
}
