use std::collections::HashMap;
use std::path::Path;

use serde_yaml::Value;

const EMBEDDED_MESSAGES: &str = include_str!("../messages.ko.yaml");

#[derive(Debug)]
pub enum CatalogError {
    Parse(String),
    Io(String),
    /// Key absent from the catalog.
    KeyNotFound(String),
    /// Template references a parameter the caller did not supply.
    MissingParam { key: String, param: String },
    /// The same key appears in more than one override file.
    DuplicateOverride { key: String, file: String },
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Parse(msg) => write!(f, "template parse error: {}", msg),
            CatalogError::Io(msg) => write!(f, "template io error: {}", msg),
            CatalogError::KeyNotFound(key) => write!(f, "template not found: {}", key),
            CatalogError::MissingParam { key, param } => {
                write!(f, "template {} missing parameter {}", key, param)
            }
            CatalogError::DuplicateOverride { key, file } => {
                write!(f, "duplicate override key {} in {}", key, file)
            }
        }
    }
}

impl std::error::Error for CatalogError {}

/// Flat dot-keyed map of user-facing message templates. Defaults are
/// embedded at compile time; an optional override directory of YAML files
/// replaces individual keys. Parameters use `{Name}` placeholders and
/// missing parameters are errors, never silent blanks.
pub struct Catalog {
    data: HashMap<String, String>,
}

impl Catalog {
    pub fn new(override_dir: Option<&str>) -> Result<Catalog, CatalogError> {
        let mut data = HashMap::new();
        flatten(
            &serde_yaml::from_str::<Value>(EMBEDDED_MESSAGES)
                .map_err(|e| CatalogError::Parse(e.to_string()))?,
            String::new(),
            &mut data,
        )?;

        if let Some(dir) = override_dir.map(str::trim).filter(|d| !d.is_empty()) {
            apply_overrides(Path::new(dir), &mut data)?;
        }
        Ok(Catalog { data })
    }

    pub fn render(&self, key: &str, params: &[(&str, &str)]) -> Result<String, CatalogError> {
        let template = self
            .data
            .get(key.trim())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| CatalogError::KeyNotFound(key.to_string()))?;
        substitute(key, template, params)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key.trim())
    }
}

fn apply_overrides(
    dir: &Path,
    data: &mut HashMap<String, String>,
) -> Result<(), CatalogError> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| CatalogError::Io(format!("read template dir: {}", e)))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    files.sort();

    let mut seen: HashMap<String, String> = HashMap::new();
    for path in files {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| CatalogError::Io(format!("read {}: {}", path.display(), e)))?;
        let mut flat = HashMap::new();
        flatten(
            &serde_yaml::from_str::<Value>(&raw)
                .map_err(|e| CatalogError::Parse(format!("{}: {}", path.display(), e)))?,
            String::new(),
            &mut flat,
        )?;
        let file_name = path.display().to_string();
        for (key, value) in flat {
            if seen.contains_key(&key) {
                return Err(CatalogError::DuplicateOverride {
                    key,
                    file: file_name,
                });
            }
            seen.insert(key.clone(), file_name.clone());
            data.insert(key, value);
        }
    }
    Ok(())
}

/// Collapse nested mappings into dot-joined keys with string leaves.
fn flatten(
    value: &Value,
    prefix: String,
    out: &mut HashMap<String, String>,
) -> Result<(), CatalogError> {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let key = k
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CatalogError::Parse(format!("non-string key under {}", prefix)))?;
                let joined = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(v, joined, out)?;
            }
            Ok(())
        }
        Value::String(s) => {
            if prefix.is_empty() {
                return Err(CatalogError::Parse("string value without key".to_string()));
            }
            out.insert(prefix, s.clone());
            Ok(())
        }
        Value::Null => Ok(()),
        other => Err(CatalogError::Parse(format!(
            "unsupported value at {}: {:?}",
            prefix, other
        ))),
    }
}

/// Replace `{Name}` placeholders. Unknown placeholders are errors so broken
/// templates fail loudly at preflight instead of leaking braces to chat.
fn substitute(
    key: &str,
    template: &str,
    params: &[(&str, &str)],
) -> Result<String, CatalogError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let close = tail
            .find('}')
            .ok_or_else(|| CatalogError::Parse(format!("unclosed brace in {}", key)))?;
        let name = &tail[..close];
        let value = params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| CatalogError::MissingParam {
                key: key.to_string(),
                param: name.to_string(),
            })?;
        out.push_str(value);
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Keys every deployment must resolve before the bot accepts traffic.
/// Missing keys are startup-fatal.
pub const PREFLIGHT_KEYS: &[(&str, &[(&str, &str)])] = &[
    ("help.korean", &[("Prefix", "!체스")]),
    ("user.identify.error", &[]),
    ("usage.lobby", &[("Prefix", "!체스")]),
    ("usage.join", &[("Prefix", "!체스")]),
    ("usage.game", &[("Prefix", "!체스")]),
    ("usage.preset", &[("Prefix", "!체스")]),
    ("game.id.invalid", &[]),
    ("lobby.none", &[]),
    ("lobby.make.limit", &[]),
    ("lobby.list.error", &[]),
    ("lobby.list.header", &[]),
    ("lobby.list.item", &[("Code", "C"), ("CreatorName", "N")]),
    ("lobby_make.success", &[("Code", "CODE"), ("Prefix", "!체스")]),
    ("channel.create.error", &[("Error", "e")]),
    ("join.error", &[("Error", "e")]),
    ("join.waiting", &[]),
    ("game.not_found", &[]),
    ("pvp.busy.in_room", &[]),
    ("pvp.start.announce", &[("WhiteName", "W"), ("BlackName", "B")]),
    ("pvp.conflict.retry", &[]),
    ("pvp.not_your_turn", &[]),
    (
        "pvp.resign.announce",
        &[("ResignerName", "A"), ("WinnerName", "B")],
    ),
    ("pvp.resign.winner", &[]),
    ("pvp.resign.loser", &[]),
    ("finish.checkmate", &[("Winner", "W")]),
    ("finish.draw", &[]),
    ("no.active.game", &[]),
    ("render.error", &[]),
    ("render.board.failed", &[]),
    ("board.send.failed", &[]),
    ("move.failed", &[]),
    ("move.failed_with_error", &[("Error", "e")]),
    ("move.bad_input", &[]),
    ("move.state.error", &[]),
    ("resign.process.error", &[]),
    ("resign.failed", &[("Error", "e")]),
    ("engine.disabled", &[]),
];

pub fn preflight(catalog: &Catalog) -> Result<(), CatalogError> {
    for (key, params) in PREFLIGHT_KEYS {
        catalog.render(key, params)?;
    }
    Ok(())
}
