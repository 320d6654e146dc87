use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tera::{Context, Tera};

use crate::cmd::{CommandRunner, CommandSpec};
use crate::config::{Config, StackKind};
use crate::error::{DeployError, DeployResult};
use crate::layout::Layout;
use crate::outcome::Warning;
use crate::release::ReleaseId;

const TEMPLATES: &[(&str, &str)] = &[
    ("site.conf.tera", include_str!("templates/nginx/site.conf.tera")),
    ("laravel.conf.tera", include_str!("templates/nginx/laravel.conf.tera")),
    ("flask.conf.tera", include_str!("templates/nginx/flask.conf.tera")),
    ("react.conf.tera", include_str!("templates/nginx/react.conf.tera")),
];

#[derive(Serialize)]
struct SiteContext<'a> {
    domain: &'a str,
    current: String,
    logs: String,
    php_fpm_service: &'a str,
    app_port: u16,
}

const fn template_for(stack: StackKind) -> &'static str {
    match stack {
        StackKind::Laravel => "laravel.conf.tera",
        StackKind::Flask => "flask.conf.tera",
        StackKind::React => "react.conf.tera",
    }
}

/// Render the Nginx server block for a domain.
///
/// The document root is the `current` pointer, so the file never
/// has to change between releases. PHP requests resolve through
/// `$realpath_root` so FPM sees the release the pointer names at
/// request time.
pub fn render_site(config: &Config, layout: &Layout) -> DeployResult<String> {
    let mut tera = Tera::default();
    tera.add_raw_templates(TEMPLATES.iter().copied())?;

    let site = SiteContext {
        domain: &config.domain,
        current: layout.current().display().to_string(),
        logs: layout.logs_dir().display().to_string(),
        php_fpm_service: &config.php_fpm_service,
        app_port: config.app_port,
    };
    let context = Context::from_serialize(&site)?;
    Ok(tera.render(template_for(config.stack), &context)?)
}

/// Installs the Nginx site and requests a TLS certificate.
///
/// The site is rewritten only when the rendered block differs from
/// the file on disk. The previous file is copied into `backups/`
/// first and put back if `nginx -t` rejects the new one.
pub struct ProxyConfigurator<'a> {
    config: &'a Config,
    layout: &'a Layout,
    runner: &'a dyn CommandRunner,
}

impl<'a> ProxyConfigurator<'a> {
    #[must_use]
    pub const fn new(config: &'a Config, layout: &'a Layout, runner: &'a dyn CommandRunner) -> Self {
        Self {
            config,
            layout,
            runner,
        }
    }

    #[must_use]
    pub fn site_path(&self) -> PathBuf {
        self.config
            .nginx_dir
            .join("sites-available")
            .join(&self.config.domain)
    }

    #[must_use]
    pub fn enabled_path(&self) -> PathBuf {
        self.config
            .nginx_dir
            .join("sites-enabled")
            .join(&self.config.domain)
    }

    /// Where the site file in place before `release` is kept.
    #[must_use]
    pub fn backup_path(&self, release: &ReleaseId) -> PathBuf {
        self.layout
            .backups_dir()
            .join(format!("nginx-{}-{release}.conf", self.config.domain))
    }

    pub fn configure(&self, release: &ReleaseId) -> DeployResult<Vec<Warning>> {
        let mut warnings = Vec::new();
        let site = self.site_path();
        let rendered = render_site(self.config, self.layout)?;

        match fs::read_to_string(&site) {
            Ok(existing) if existing == rendered => {
                tracing::debug!(site = %site.display(), "nginx site unchanged");
            }
            Ok(_) => {
                let backup = self.backup_path(release);
                fs::create_dir_all(self.layout.backups_dir())?;
                fs::copy(&site, &backup)?;
                tracing::info!(backup = %backup.display(), "backed up nginx site");
                self.install(&rendered, Some(&backup))?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => self.install(&rendered, None)?,
            Err(e) => return Err(e.into()),
        }

        if self.config.ssl_enabled {
            self.request_certificate(&mut warnings);
        }
        Ok(warnings)
    }

    fn install(&self, rendered: &str, backup: Option<&Path>) -> DeployResult<()> {
        let site = self.site_path();
        let enabled = self.enabled_path();

        for path in [&site, &enabled] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&site, rendered)?;
        let linked = match symlink(&site, &enabled) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => false,
            Err(e) => return Err(e.into()),
        };
        tracing::info!(site = %site.display(), "wrote nginx site");

        let test = CommandSpec::new("nginx").arg("-t");
        let reason = match self.runner.run(&test) {
            Ok(out) if out.success() => return Ok(()),
            Ok(out) => out.reason(),
            Err(e) => e.to_string(),
        };
        tracing::error!(%reason, "nginx rejected the site; restoring previous state");

        let restored = self.restore(backup, linked);
        match restored {
            Ok(()) => Err(DeployError::Proxy(format!("nginx -t rejected the site: {reason}"))),
            Err(e) => Err(DeployError::Proxy(format!(
                "nginx -t rejected the site: {reason}; restoring the previous site failed: {e}"
            ))),
        }
    }

    /// Put back what was there before `install`: the backed-up
    /// site, or nothing, and the enabled link only if this run
    /// created it.
    fn restore(&self, backup: Option<&Path>, linked: bool) -> std::io::Result<()> {
        match backup {
            Some(backup) => {
                fs::copy(backup, self.site_path())?;
            }
            None => fs::remove_file(self.site_path())?,
        }
        if linked {
            fs::remove_file(self.enabled_path())?;
        }
        Ok(())
    }

    fn request_certificate(&self, warnings: &mut Vec<Warning>) {
        let email = self.config.ssl_email.as_deref().unwrap_or_default();
        let certbot = CommandSpec::new("certbot").args([
            "--nginx",
            "-d",
            self.config.domain.as_str(),
            "--non-interactive",
            "--agree-tos",
            "-m",
            email,
            "--redirect",
            "--keep-until-expiring",
        ]);

        let reason = match self.runner.run(&certbot) {
            Ok(out) if out.success() => return,
            Ok(out) => out.reason(),
            Err(e) => e.to_string(),
        };
        tracing::warn!(%reason, "certbot failed; site stays on plain HTTP");
        warnings.push(Warning::best_effort("certbot", reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::RecordingRunner;

    fn config(base: &Path, stack: StackKind) -> Config {
        Config::new("app.example.com", "repo")
            .stack(stack)
            .base_dir(base.join("www"))
            .nginx_dir(base.join("nginx"))
    }

    fn release(id: &str) -> ReleaseId {
        ReleaseId::parse(id).unwrap()
    }

    #[test]
    fn laravel_site_uses_realpath_root() {
        let config = Config::new("a.com", "repo");
        let site = render_site(&config, &Layout::for_config(&config)).unwrap();

        assert!(site.starts_with("server {\n    listen 80;\n"));
        assert!(site.contains("server_name a.com;"));
        assert!(site.contains("access_log /var/www/a.com/logs/access.log;"));
        assert!(site.contains("root /var/www/a.com/current;"));
        assert!(site.contains("try_files $uri $uri/ /index.php?$query_string;"));
        assert!(site.contains("fastcgi_pass unix:/run/php/php8.3-fpm.sock;"));
        assert!(site.contains("$realpath_root$fastcgi_script_name"));
        assert!(site.contains("location ~ /\\.(?!well-known).* {"));
        assert!(site.trim_end().ends_with('}'));
    }

    #[test]
    fn flask_site_proxies_to_app_port() {
        let config = Config::new("a.com", "repo")
            .stack(StackKind::Flask)
            .app_port(5000);
        let site = render_site(&config, &Layout::for_config(&config)).unwrap();

        assert!(site.contains("proxy_pass http://127.0.0.1:5000;"));
        assert!(site.contains("alias /var/www/a.com/current/static/;"));
        assert!(!site.contains("fastcgi_pass"));
    }

    #[test]
    fn react_site_falls_back_to_index() {
        let config = Config::new("a.com", "repo").stack(StackKind::React);
        let site = render_site(&config, &Layout::for_config(&config)).unwrap();

        assert!(site.contains("root /var/www/a.com/current;"));
        assert!(site.contains("try_files $uri $uri/ /index.html;"));
        assert!(!site.contains("proxy_pass"));
    }

    #[test]
    fn writes_and_enables_site() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), StackKind::React);
        let layout = Layout::for_config(&config);
        let runner = RecordingRunner::new();
        let proxy = ProxyConfigurator::new(&config, &layout, &runner);

        proxy.configure(&release("20240309_100000")).unwrap();

        assert_eq!(
            fs::read_to_string(proxy.enabled_path()).unwrap(),
            render_site(&config, &layout).unwrap()
        );
        assert_eq!(runner.commands(), vec!["nginx -t"]);
    }

    #[test]
    fn unchanged_site_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), StackKind::React);
        let layout = Layout::for_config(&config);
        let runner = RecordingRunner::new();
        let proxy = ProxyConfigurator::new(&config, &layout, &runner);

        proxy.configure(&release("20240309_100000")).unwrap();
        proxy.configure(&release("20240309_100100")).unwrap();

        assert_eq!(runner.commands(), vec!["nginx -t"]);
        assert!(!proxy.backup_path(&release("20240309_100100")).exists());
    }

    #[test]
    fn changed_site_is_backed_up_first() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), StackKind::React);
        let layout = Layout::for_config(&config);
        let runner = RecordingRunner::new();
        let proxy = ProxyConfigurator::new(&config, &layout, &runner);
        proxy.configure(&release("20240309_100000")).unwrap();
        fs::write(proxy.site_path(), "# hand edited").unwrap();

        proxy.configure(&release("20240309_100100")).unwrap();

        let backup = proxy.backup_path(&release("20240309_100100"));
        assert_eq!(fs::read_to_string(backup).unwrap(), "# hand edited");
        assert_eq!(
            fs::read_to_string(proxy.site_path()).unwrap(),
            render_site(&config, &layout).unwrap()
        );
    }

    #[test]
    fn rejected_site_restores_backup() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), StackKind::React);
        let layout = Layout::for_config(&config);
        let ok = RecordingRunner::new();
        ProxyConfigurator::new(&config, &layout, &ok)
            .configure(&release("20240309_100000"))
            .unwrap();
        let proxy_site = config.nginx_dir.join("sites-available/app.example.com");
        fs::write(&proxy_site, "# working site").unwrap();

        let failing = RecordingRunner::new().fail("nginx -t");
        let proxy = ProxyConfigurator::new(&config, &layout, &failing);
        let err = proxy.configure(&release("20240309_100100")).unwrap_err();

        assert!(matches!(err, DeployError::Proxy(_)));
        assert_eq!(fs::read_to_string(proxy.site_path()).unwrap(), "# working site");
        // The link predates this run and stays.
        assert_eq!(
            fs::read_to_string(proxy.enabled_path()).unwrap(),
            "# working site"
        );
    }

    #[test]
    fn rejected_first_site_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), StackKind::React);
        let layout = Layout::for_config(&config);
        let runner = RecordingRunner::new().fail("nginx -t");
        let proxy = ProxyConfigurator::new(&config, &layout, &runner);

        let err = proxy.configure(&release("20240309_100000")).unwrap_err();

        assert!(matches!(err, DeployError::Proxy(_)));
        assert!(!proxy.site_path().exists());
        assert!(fs::symlink_metadata(proxy.enabled_path()).is_err());
    }

    #[test]
    fn certbot_failure_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), StackKind::React).ssl("ops@example.com");
        let layout = Layout::for_config(&config);
        let runner = RecordingRunner::new().fail("certbot");

        let warnings = ProxyConfigurator::new(&config, &layout, &runner)
            .configure(&release("20240309_100000"))
            .unwrap();

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].step, "certbot");
        assert!(
            runner
                .commands()
                .iter()
                .any(|c| c.starts_with("certbot --nginx -d app.example.com"))
        );
    }
}
