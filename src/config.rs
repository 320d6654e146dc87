use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};

use crate::error::{DeployError, DeployResult};

/// Application framework being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StackKind {
    #[default]
    Laravel,
    Flask,
    React,
}

impl FromStr for StackKind {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "laravel" | "php" => Ok(Self::Laravel),
            "flask" | "python" => Ok(Self::Flask),
            "react" | "node" => Ok(Self::React),
            other => Err(DeployError::Config(format!(
                "unknown stack '{other}' (expected laravel, flask or react)"
            ))),
        }
    }
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Laravel => "laravel",
            Self::Flask => "flask",
            Self::React => "react",
        };
        f.write_str(name)
    }
}

/// Whether a shared item is a plain file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharedKind {
    File,
    Dir,
}

impl SharedKind {
    /// Default kind for an untagged item: a final path component
    /// containing a dot is a file (`.env`, `database.sqlite`),
    /// anything else a directory.
    #[must_use]
    pub fn infer(name: &str) -> Self {
        let last = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if last.contains('.') {
            Self::File
        } else {
            Self::Dir
        }
    }
}

/// A path that persists across releases under `shared/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedItem {
    pub name: String,
    pub kind: SharedKind,
}

impl SharedItem {
    #[must_use]
    pub fn new(name: &str, kind: SharedKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    /// Parse `name`, `name:file` or `name:dir`.
    pub fn parse(entry: &str) -> DeployResult<Self> {
        let entry = entry.trim();
        let (name, kind) = match entry.rsplit_once(':') {
            Some((name, "file")) => (name, SharedKind::File),
            Some((name, "dir")) => (name, SharedKind::Dir),
            Some((_, tag)) => {
                return Err(DeployError::Config(format!(
                    "shared item '{entry}': unknown kind '{tag}' (expected file or dir)"
                )));
            }
            None => (entry, SharedKind::infer(entry)),
        };
        Ok(Self::new(name.trim_end_matches('/'), kind))
    }
}

/// Parse a delimited shared-item list. Entries are separated by
/// commas or whitespace.
pub fn parse_shared_list(list: &str) -> DeployResult<IndexMap<String, SharedKind>> {
    let mut items = IndexMap::new();
    for entry in list
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|e| !e.is_empty())
    {
        let item = SharedItem::parse(entry)?;
        items.insert(item.name, item.kind);
    }
    Ok(items)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SharedEntry {
    Short(String),
    Full {
        name: String,
        kind: Option<SharedKind>,
    },
}

fn deserialize_shared<'de, D>(d: D) -> Result<Option<IndexMap<String, SharedKind>>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Option<Vec<SharedEntry>> = Option::deserialize(d)?;
    let Some(entries) = entries else {
        return Ok(None);
    };

    let mut items = IndexMap::new();
    for entry in entries {
        let item = match entry {
            SharedEntry::Short(s) => SharedItem::parse(&s).map_err(serde::de::Error::custom)?,
            SharedEntry::Full { name, kind } => {
                let kind = kind.unwrap_or_else(|| SharedKind::infer(&name));
                SharedItem::new(&name, kind)
            }
        };
        items.insert(item.name, item.kind);
    }
    Ok(Some(items))
}

/// Everything a deploy needs, built once at startup and
/// validated before any side effect.
///
/// # Example
///
/// ```
/// use estaleiro::config::{Config, SharedKind, StackKind};
///
/// let config = Config::new("app.example.com", "https://github.com/acme/app.git")
///     .stack(StackKind::React)
///     .branch("release")
///     .keep_releases(3)
///     .shared("uploads", SharedKind::Dir);
///
/// config.validate().unwrap();
/// assert_eq!(config.keep_releases, 3);
/// assert_eq!(config.shared_items()[0].name, "uploads");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub domain: String,
    pub repository: String,
    pub branch: String,
    pub stack: StackKind,
    pub base_dir: PathBuf,
    pub keep_releases: usize,
    #[serde(deserialize_with = "deserialize_shared")]
    pub shared: Option<IndexMap<String, SharedKind>>,
    pub run_migrations: bool,
    pub ssl_enabled: bool,
    pub ssl_email: Option<String>,
    pub app_user: String,
    pub app_group: String,
    pub php_fpm_service: String,
    pub app_service: Option<String>,
    pub app_port: u16,
    pub build_dir: String,
    pub entry_point: String,
    pub install_packages: bool,
    pub configure_proxy: bool,
    pub nginx_dir: PathBuf,
    pub fetch_timeout_secs: u64,
    pub step_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain: String::new(),
            repository: String::new(),
            branch: "main".to_string(),
            stack: StackKind::default(),
            base_dir: PathBuf::from("/var/www"),
            keep_releases: 5,
            shared: None,
            run_migrations: false,
            ssl_enabled: false,
            ssl_email: None,
            app_user: "www-data".to_string(),
            app_group: "www-data".to_string(),
            php_fpm_service: "php8.3-fpm".to_string(),
            app_service: None,
            app_port: 8000,
            build_dir: "build".to_string(),
            entry_point: "wsgi.py".to_string(),
            install_packages: true,
            configure_proxy: true,
            nginx_dir: PathBuf::from("/etc/nginx"),
            fetch_timeout_secs: 600,
            step_timeout_secs: 1800,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new(domain: &str, repository: &str) -> Self {
        Self {
            domain: domain.to_string(),
            repository: repository.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn branch(mut self, branch: &str) -> Self {
        self.branch = branch.to_string();
        self
    }

    #[must_use]
    pub const fn stack(mut self, stack: StackKind) -> Self {
        self.stack = stack;
        self
    }

    #[must_use]
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn keep_releases(mut self, keep: usize) -> Self {
        self.keep_releases = keep;
        self
    }

    /// Add a shared item. The first call replaces the stack's
    /// default shared list.
    #[must_use]
    pub fn shared(mut self, name: &str, kind: SharedKind) -> Self {
        self.shared
            .get_or_insert_with(IndexMap::new)
            .insert(name.to_string(), kind);
        self
    }

    /// Share nothing, overriding the stack defaults.
    #[must_use]
    pub fn no_shared(mut self) -> Self {
        self.shared = Some(IndexMap::new());
        self
    }

    #[must_use]
    pub const fn run_migrations(mut self, enabled: bool) -> Self {
        self.run_migrations = enabled;
        self
    }

    #[must_use]
    pub fn ssl(mut self, email: &str) -> Self {
        self.ssl_enabled = true;
        self.ssl_email = Some(email.to_string());
        self
    }

    #[must_use]
    pub fn app_user(mut self, user: &str, group: &str) -> Self {
        self.app_user = user.to_string();
        self.app_group = group.to_string();
        self
    }

    #[must_use]
    pub fn php_fpm_service(mut self, service: &str) -> Self {
        self.php_fpm_service = service.to_string();
        self
    }

    #[must_use]
    pub fn app_service(mut self, service: &str) -> Self {
        self.app_service = Some(service.to_string());
        self
    }

    #[must_use]
    pub const fn app_port(mut self, port: u16) -> Self {
        self.app_port = port;
        self
    }

    #[must_use]
    pub fn build_dir(mut self, dir: &str) -> Self {
        self.build_dir = dir.to_string();
        self
    }

    #[must_use]
    pub fn entry_point(mut self, file: &str) -> Self {
        self.entry_point = file.to_string();
        self
    }

    #[must_use]
    pub const fn install_packages(mut self, enabled: bool) -> Self {
        self.install_packages = enabled;
        self
    }

    #[must_use]
    pub const fn configure_proxy(mut self, enabled: bool) -> Self {
        self.configure_proxy = enabled;
        self
    }

    #[must_use]
    pub fn nginx_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.nginx_dir = dir.into();
        self
    }

    /// `<base_dir>/<domain>`: root of the per-domain tree.
    #[must_use]
    pub fn domain_root(&self) -> PathBuf {
        self.base_dir.join(&self.domain)
    }

    /// Configured shared items, or the stack defaults when none
    /// were given.
    #[must_use]
    pub fn shared_items(&self) -> Vec<SharedItem> {
        self.shared.as_ref().map_or_else(
            || default_shared(self.stack),
            |items| {
                items
                    .iter()
                    .map(|(name, kind)| SharedItem::new(name, *kind))
                    .collect()
            },
        )
    }

    /// systemd unit restarted after activation. Flask defaults
    /// to a unit named after the domain.
    #[must_use]
    pub fn service_name(&self) -> Option<String> {
        match (&self.app_service, self.stack) {
            (Some(s), _) => Some(s.clone()),
            (None, StackKind::Flask) => Some(self.domain.clone()),
            (None, _) => None,
        }
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub const fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Load from a YAML file and validate.
    pub fn from_file(path: &Path) -> DeployResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> DeployResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from process environment variables and validate.
    pub fn from_env() -> DeployResult<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup and validate.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> DeployResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.domain = get("DOMAIN").unwrap_or_default();
        config.repository = get("REPO_URL").unwrap_or_default();
        if let Some(v) = get("BRANCH") {
            config.branch = v;
        }
        if let Some(v) = get("STACK") {
            config.stack = v.parse()?;
        }
        if let Some(v) = get("BASE_DIR") {
            config.base_dir = PathBuf::from(v);
        }
        if let Some(v) = get("KEEP_RELEASES") {
            config.keep_releases = parse_number("KEEP_RELEASES", &v)?;
        }
        if let Some(v) = get("SHARED_ITEMS") {
            config.shared = Some(parse_shared_list(&v)?);
        }
        if let Some(v) = get("RUN_MIGRATIONS") {
            config.run_migrations = parse_bool("RUN_MIGRATIONS", &v)?;
        }
        if let Some(v) = get("SSL_ENABLED") {
            config.ssl_enabled = parse_bool("SSL_ENABLED", &v)?;
        }
        config.ssl_email = get("SSL_EMAIL");
        if let Some(v) = get("APP_USER") {
            config.app_user = v;
        }
        if let Some(v) = get("APP_GROUP") {
            config.app_group = v;
        }
        if let Some(v) = get("PHP_FPM_SERVICE") {
            config.php_fpm_service = v;
        }
        config.app_service = get("APP_SERVICE");
        if let Some(v) = get("APP_PORT") {
            config.app_port = parse_number("APP_PORT", &v)?;
        }
        if let Some(v) = get("BUILD_DIR") {
            config.build_dir = v;
        }
        if let Some(v) = get("ENTRY_POINT") {
            config.entry_point = v;
        }
        if let Some(v) = get("INSTALL_PACKAGES") {
            config.install_packages = parse_bool("INSTALL_PACKAGES", &v)?;
        }
        if let Some(v) = get("CONFIGURE_PROXY") {
            config.configure_proxy = parse_bool("CONFIGURE_PROXY", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every field. Nothing on the host is touched before
    /// this passes.
    pub fn validate(&self) -> DeployResult<()> {
        if self.domain.trim().is_empty() {
            return Err(DeployError::Config("domain is required".into()));
        }
        if self.domain.contains(['/', '\\']) || self.domain.chars().any(char::is_whitespace) {
            return Err(DeployError::Config(format!(
                "invalid domain '{}'",
                self.domain
            )));
        }
        if self.domain == "." || self.domain == ".." {
            return Err(DeployError::Config(format!(
                "invalid domain '{}'",
                self.domain
            )));
        }
        if self.repository.trim().is_empty() {
            return Err(DeployError::Config("repository URL is required".into()));
        }
        if self.branch.trim().is_empty() {
            return Err(DeployError::Config("branch must not be empty".into()));
        }
        if !self.base_dir.is_absolute() {
            return Err(DeployError::Config(format!(
                "base_dir must be absolute: {}",
                self.base_dir.display()
            )));
        }
        if self.keep_releases == 0 {
            return Err(DeployError::Config(
                "keep_releases must be at least 1".into(),
            ));
        }
        if self.ssl_enabled && self.ssl_email.as_deref().is_none_or(str::is_empty) {
            return Err(DeployError::Config(
                "ssl_email is required when SSL is enabled".into(),
            ));
        }
        if !is_relative_inside(&self.build_dir) {
            return Err(DeployError::Config(format!(
                "build_dir must be a relative path inside the release: {}",
                self.build_dir
            )));
        }
        if !names_entry_inside(&self.entry_point) {
            return Err(DeployError::Config(format!(
                "entry_point must be a relative path inside the release: {}",
                self.entry_point
            )));
        }
        let items = self.shared_items();
        for item in &items {
            if !names_entry_inside(&item.name) {
                return Err(DeployError::Config(format!(
                    "shared item must name a path inside the release: {}",
                    item.name
                )));
            }
        }
        // A nested item would be linked through its parent's symlink
        // and land inside shared/ itself.
        for outer in &items {
            for inner in &items {
                if outer.name != inner.name && Path::new(&inner.name).starts_with(&outer.name) {
                    return Err(DeployError::Config(format!(
                        "shared items '{}' and '{}' overlap",
                        outer.name, inner.name
                    )));
                }
            }
        }
        if self.fetch_timeout_secs == 0 || self.step_timeout_secs == 0 {
            return Err(DeployError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

/// Shared items used when the configuration names none.
#[must_use]
pub fn default_shared(stack: StackKind) -> Vec<SharedItem> {
    match stack {
        StackKind::Laravel => vec![
            SharedItem::new(".env", SharedKind::File),
            SharedItem::new("storage", SharedKind::Dir),
        ],
        StackKind::Flask => vec![
            SharedItem::new(".env", SharedKind::File),
            SharedItem::new("instance", SharedKind::Dir),
        ],
        StackKind::React => vec![SharedItem::new(".env", SharedKind::File)],
    }
}

fn is_relative_inside(path: &str) -> bool {
    let p = Path::new(path);
    !path.is_empty()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Like [`is_relative_inside`], but `.` alone is rejected: the path
/// must name an entry below the release root.
fn names_entry_inside(path: &str) -> bool {
    is_relative_inside(path)
        && Path::new(path)
            .components()
            .any(|c| matches!(c, Component::Normal(_)))
}

fn parse_bool(key: &str, value: &str) -> DeployResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DeployError::Config(format!(
            "{key}: expected a boolean, got '{other}'"
        ))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> DeployResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DeployError::Config(format!("{key}: expected a number, got '{value}'")))
}
