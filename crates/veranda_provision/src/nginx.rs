//! Nginx virtual-host provisioner.
//!
//! Provision sequence: validate, ensure directories + runtime bootstrap,
//! capture the rollback baseline, write the config atomically, upsert the
//! enabled symlink, then syntax-check and reload the server. Any failure
//! after the first write triggers the rollback plan; the original error is
//! returned even when rollback itself also fails.

use async_trait::async_trait;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use veranda_protocol::{Site, SiteProvisioner, SiteRuntime};

use crate::error::{ProvisionError, Result};
use crate::rollback::{Compensation, RollbackPlan};

/// Constructor parameters for the provisioner, supplied by the config
/// layer. The core treats them as plain data.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// When false, provision and deprovision log and return without
    /// touching the system (dry-run mode).
    pub apply: bool,
    /// Directory holding all virtual-host config files.
    pub available_dir: PathBuf,
    /// Directory of symlinks to the enabled virtual hosts.
    pub enabled_dir: PathBuf,
    /// Command validating the nginx configuration, e.g. `nginx -t`.
    pub test_command: String,
    /// Command reloading the running server, e.g. `systemctl reload nginx`.
    pub reload_command: String,
    /// Timeout applied to each external command; expiry kills the child
    /// and counts as a provisioning failure.
    pub command_timeout: Duration,
}

/// Makes the live nginx configuration match a site's desired state, or
/// leaves it exactly as before.
pub struct NginxProvisioner {
    cfg: ProvisionConfig,
}

impl NginxProvisioner {
    pub fn new(cfg: ProvisionConfig) -> Self {
        Self { cfg }
    }

    /// Publish the site's virtual host and reload the server. A failure in
    /// the publish/verify steps restores the previous config file content
    /// and symlink target before returning the error.
    pub async fn provision(&self, site: &Site) -> Result<()> {
        if !self.cfg.apply {
            info!("dry-run provisioning site={} domain={}", site.id, site.domain);
            return Ok(());
        }
        if site.domain.trim().is_empty() {
            return Err(ProvisionError::EmptyDomain);
        }
        if site.root_path.trim().is_empty() {
            return Err(ProvisionError::EmptyRoot);
        }

        fs::create_dir_all(&self.cfg.available_dir)
            .await
            .map_err(|err| ProvisionError::io("create available dir", err))?;
        fs::create_dir_all(&self.cfg.enabled_dir)
            .await
            .map_err(|err| ProvisionError::io("create enabled dir", err))?;
        fs::create_dir_all(&site.root_path)
            .await
            .map_err(|err| ProvisionError::io("create site root", err))?;
        bootstrap_site_root(site).await?;

        let conf_name = conf_name_for(&site.domain);
        let conf_path = self.cfg.available_dir.join(&conf_name);
        let link_path = self.cfg.enabled_dir.join(&conf_name);

        // Rollback baseline: captured before the first write, restored in
        // reverse order on failure.
        let mut plan = RollbackPlan::new();
        plan.push(Compensation::restore_file(
            &conf_path,
            read_if_exists(&conf_path).await?,
        ));
        plan.push(Compensation::restore_symlink(
            &link_path,
            read_link_if_exists(&link_path).await?,
        ));

        if let Err(err) = self.publish(site, &conf_path, &link_path).await {
            warn!(
                "provision failed for {}, rolling back: {err}",
                site.domain
            );
            plan.run().await;
            return Err(err);
        }

        info!(
            "site provisioned domain={} conf={}",
            site.domain,
            conf_path.display()
        );
        Ok(())
    }

    async fn publish(&self, site: &Site, conf_path: &Path, link_path: &Path) -> Result<()> {
        write_atomic(conf_path, render_server_block(site).as_bytes()).await?;
        upsert_symlink(conf_path, link_path).await?;
        self.run_command(&self.cfg.test_command).await?;
        self.run_command(&self.cfg.reload_command).await?;
        Ok(())
    }

    /// Retract the site's virtual host. Removing an already-absent pair is
    /// fine; a failing syntax check or reload afterwards is reported but
    /// the removed files are not restored (terminal operation).
    pub async fn deprovision(&self, site: &Site) -> Result<()> {
        if !self.cfg.apply {
            info!("dry-run deprovision site={} domain={}", site.id, site.domain);
            return Ok(());
        }
        if site.domain.trim().is_empty() {
            return Err(ProvisionError::EmptyDomain);
        }

        let conf_name = conf_name_for(&site.domain);
        remove_if_exists(&self.cfg.enabled_dir.join(&conf_name)).await?;
        remove_if_exists(&self.cfg.available_dir.join(&conf_name)).await?;

        self.run_command(&self.cfg.test_command).await?;
        self.run_command(&self.cfg.reload_command).await?;

        info!("site deprovisioned domain={}", site.domain);
        Ok(())
    }

    async fn run_command(&self, raw: &str) -> Result<()> {
        let mut parts = raw.split_whitespace();
        let program = parts.next().ok_or(ProvisionError::EmptyCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(parts).kill_on_drop(true);

        let output = match timeout(self.cfg.command_timeout, cmd.output()).await {
            Ok(result) => result.map_err(|err| ProvisionError::CommandFailed {
                command: raw.to_string(),
                detail: err.to_string(),
            })?,
            Err(_) => {
                return Err(ProvisionError::CommandTimeout {
                    command: raw.to_string(),
                    timeout_secs: self.cfg.command_timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if detail.is_empty() {
                detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            if detail.is_empty() {
                detail = output.status.to_string();
            }
            return Err(ProvisionError::CommandFailed {
                command: raw.to_string(),
                detail,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SiteProvisioner for NginxProvisioner {
    async fn provision_site(&self, site: &Site) -> anyhow::Result<()> {
        self.provision(site).await.map_err(Into::into)
    }

    async fn deprovision_site(&self, site: &Site) -> anyhow::Result<()> {
        self.deprovision(site).await.map_err(Into::into)
    }
}

// ============================================================================
// Config rendering
// ============================================================================

/// File name of a site's config, derived deterministically from the domain.
fn conf_name_for(domain: &str) -> String {
    let clean = domain.trim().to_lowercase();
    let clean = clean.replace("..", ".").replace('/', "-");
    format!("{}.conf", clean)
}

fn render_server_block(site: &Site) -> String {
    format!(
        "server {{\n    listen 80;\n    listen [::]:80;\n    server_name {domain};\n\n    root {root};\n    index index.php index.html index.htm;\n\n{core}\n}}\n",
        domain = site.domain,
        root = site.root_path,
        core = runtime_server_core(site.runtime, &site.root_path),
    )
}

fn runtime_server_core(runtime: SiteRuntime, root_path: &str) -> String {
    match runtime {
        SiteRuntime::Node => r#"    location / {
        proxy_pass http://127.0.0.1:3000;
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }"#
        .to_string(),
        SiteRuntime::Python => r#"    location / {
        proxy_pass http://127.0.0.1:8000;
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }"#
        .to_string(),
        SiteRuntime::Static => r#"    location / {
        try_files $uri $uri/ =404;
    }"#
        .to_string(),
        SiteRuntime::Php => format!(
            r#"    location / {{
        try_files $uri $uri/ /index.php?$query_string;
    }}

    location ~ \.php$ {{
        include fastcgi_params;
        fastcgi_param SCRIPT_FILENAME {root_path}$fastcgi_script_name;
        fastcgi_pass unix:/run/php/php8.1-fpm.sock;
        fastcgi_index index.php;
    }}"#
        ),
    }
}

// ============================================================================
// Runtime bootstrap
// ============================================================================

/// Seed the site root with a default index document when the runtime needs
/// one and none exists. Idempotent: an existing index file is never
/// overwritten.
async fn bootstrap_site_root(site: &Site) -> Result<()> {
    let root = Path::new(site.root_path.trim());
    match site.runtime {
        SiteRuntime::Php => {
            if has_any_index(root).await? {
                return Ok(());
            }
            write_if_absent(
                &root.join("index.php"),
                default_php_index(&site.domain).as_bytes(),
            )
            .await
        }
        SiteRuntime::Static => {
            if has_any_index(root).await? {
                return Ok(());
            }
            write_if_absent(
                &root.join("index.html"),
                default_static_index(&site.domain).as_bytes(),
            )
            .await
        }
        // Proxy runtimes serve their own documents.
        SiteRuntime::Node | SiteRuntime::Python => Ok(()),
    }
}

async fn has_any_index(root: &Path) -> Result<bool> {
    for name in ["index.php", "index.html", "index.htm"] {
        match fs::metadata(root.join(name)).await {
            Ok(_) => return Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(ProvisionError::io("stat index file", err)),
        }
    }
    Ok(false)
}

async fn write_if_absent(path: &Path, content: &[u8]) -> Result<()> {
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(mut file) => file
            .write_all(content)
            .await
            .map_err(|err| ProvisionError::io("write index file", err)),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(ProvisionError::io("create index file", err)),
    }
}

fn default_static_index(domain: &str) -> String {
    let label = display_label(domain);
    format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n  <meta charset=\"utf-8\">\n  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n  <title>{label}</title>\n</head>\n<body>\n  <h1>{label} is live</h1>\n  <p>Provisioned by Veranda Panel.</p>\n</body>\n</html>\n"
    )
}

fn default_php_index(domain: &str) -> String {
    let label = display_label(domain);
    format!(
        "<?php\nheader('Content-Type: text/html; charset=utf-8');\n?>\n<!doctype html>\n<html lang=\"en\">\n<head>\n  <meta charset=\"utf-8\">\n  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n  <title>{label}</title>\n</head>\n<body>\n  <h1>{label} is live</h1>\n  <p>Provisioned by Veranda Panel (PHP runtime).</p>\n</body>\n</html>\n"
    )
}

fn display_label(domain: &str) -> &str {
    let label = domain.trim();
    if label.is_empty() {
        "site"
    } else {
        label
    }
}

// ============================================================================
// Filesystem helpers
// ============================================================================

/// Write a file through a temp sibling + rename so it is observed either
/// fully old or fully new.
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    fs::write(&tmp, content)
        .await
        .map_err(|err| ProvisionError::io("write temp file", err))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|err| ProvisionError::io("replace file", err))?;
    Ok(())
}

pub(crate) async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ProvisionError::io("remove file", err)),
    }
}

async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ProvisionError::io("read previous conf", err)),
    }
}

/// Capture the current target of `path` when it is a symlink. A missing
/// path and a non-symlink both yield `None`: restoring either means
/// removing whatever the transaction put there.
async fn read_link_if_exists(path: &Path) -> Result<Option<PathBuf>> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => fs::read_link(path)
            .await
            .map(Some)
            .map_err(|err| ProvisionError::io("read previous link", err)),
        Ok(_) => Ok(None),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ProvisionError::io("read previous link", err)),
    }
}

/// Point `link_path` at `target`. No-op when the link already points there,
/// atomic replace otherwise.
async fn upsert_symlink(target: &Path, link_path: &Path) -> Result<()> {
    match fs::symlink_metadata(link_path).await {
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                if let Ok(current) = fs::read_link(link_path).await {
                    if current == target {
                        return Ok(());
                    }
                }
            }
            fs::remove_file(link_path)
                .await
                .map_err(|err| ProvisionError::io("replace symlink", err))?;
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(ProvisionError::io("inspect symlink", err)),
    }
    fs::symlink(target, link_path)
        .await
        .map_err(|err| ProvisionError::io("create symlink", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use veranda_ids::{SiteId, UserId};
    use veranda_protocol::SiteStatus;

    fn test_site(domain: &str, root: &Path, runtime: SiteRuntime) -> Site {
        let now = Utc::now();
        Site {
            id: SiteId::parse("site-1").unwrap(),
            domain: domain.to_string(),
            root_path: root.display().to_string(),
            runtime,
            status: SiteStatus::Provisioning,
            created_by: UserId::parse("usr-1").unwrap(),
            created_at: now,
            updated_at: now,
        }
    }

    fn test_config(base: &Path, test_command: &str, reload_command: &str) -> ProvisionConfig {
        ProvisionConfig {
            apply: true,
            available_dir: base.join("sites-available"),
            enabled_dir: base.join("sites-enabled"),
            test_command: test_command.to_string(),
            reload_command: reload_command.to_string(),
            command_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_render_static_server_block() {
        let site = test_site("example.com", Path::new("/var/www/example"), SiteRuntime::Static);
        let conf = render_server_block(&site);
        assert!(conf.contains("server_name example.com;"));
        assert!(conf.contains("root /var/www/example;"));
        assert!(conf.contains("try_files $uri $uri/ =404;"));
    }

    #[test]
    fn test_render_php_server_block() {
        let site = test_site("example.com", Path::new("/var/www/example"), SiteRuntime::Php);
        let conf = render_server_block(&site);
        assert!(conf.contains("fastcgi_param SCRIPT_FILENAME /var/www/example$fastcgi_script_name;"));
        assert!(conf.contains("/index.php?$query_string"));
    }

    #[test]
    fn test_conf_name_is_sanitized() {
        assert_eq!(conf_name_for(" Example.COM "), "example.com.conf");
        assert_eq!(conf_name_for("a..b/c"), "a.b-c.conf");
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path(), "false", "false");
        cfg.apply = false;
        let p = NginxProvisioner::new(cfg);

        let site = test_site("example.com", &dir.path().join("root"), SiteRuntime::Static);
        p.provision(&site).await.unwrap();
        p.deprovision(&site).await.unwrap();

        assert!(!dir.path().join("sites-available").exists());
        assert!(!dir.path().join("root").exists());
    }

    #[tokio::test]
    async fn test_empty_domain_rejected_before_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let p = NginxProvisioner::new(test_config(dir.path(), "true", "true"));
        let site = test_site("", &dir.path().join("root"), SiteRuntime::Static);

        assert!(matches!(
            p.provision(&site).await,
            Err(ProvisionError::EmptyDomain)
        ));
        assert!(!dir.path().join("sites-available").exists());
    }

    #[tokio::test]
    async fn test_provision_publishes_pair_and_bootstraps_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("srv/a");
        let p = NginxProvisioner::new(test_config(dir.path(), "true", "true"));

        let site = test_site("a.test", &root, SiteRuntime::Static);
        p.provision(&site).await.unwrap();

        let conf_path = dir.path().join("sites-available/a.test.conf");
        let link_path = dir.path().join("sites-enabled/a.test.conf");
        let conf = std::fs::read_to_string(&conf_path).unwrap();
        assert!(conf.contains("server_name a.test;"));
        assert_eq!(std::fs::read_link(&link_path).unwrap(), conf_path);

        let index = std::fs::read_to_string(root.join("index.html")).unwrap();
        assert!(index.contains("a.test"));

        // Re-provisioning is a no-op for the symlink and never rewrites the
        // index document.
        p.provision(&site).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join("index.html")).unwrap(),
            index
        );
    }

    #[tokio::test]
    async fn test_bootstrap_preserves_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("index.html"), "custom").unwrap();

        let p = NginxProvisioner::new(test_config(dir.path(), "true", "true"));
        let site = test_site("a.test", &root, SiteRuntime::Static);
        p.provision(&site).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(root.join("index.html")).unwrap(),
            "custom"
        );
    }

    #[tokio::test]
    async fn test_reload_failure_rolls_back_to_previous_pair() {
        let dir = tempfile::tempdir().unwrap();
        let available = dir.path().join("sites-available");
        let enabled = dir.path().join("sites-enabled");
        std::fs::create_dir_all(&available).unwrap();
        std::fs::create_dir_all(&enabled).unwrap();

        // Pre-existing pair: old config content, symlink to a decoy target.
        let conf_path = available.join("a.test.conf");
        let link_path = enabled.join("a.test.conf");
        let decoy = dir.path().join("decoy.conf");
        std::fs::write(&conf_path, "old config body").unwrap();
        std::fs::write(&decoy, "decoy").unwrap();
        std::os::unix::fs::symlink(&decoy, &link_path).unwrap();

        let p = NginxProvisioner::new(test_config(dir.path(), "true", "false"));
        let site = test_site("a.test", &dir.path().join("root"), SiteRuntime::Static);

        let err = p.provision(&site).await.unwrap_err();
        assert!(matches!(err, ProvisionError::CommandFailed { .. }));

        // Byte-for-byte identical to the pre-call state.
        assert_eq!(
            std::fs::read_to_string(&conf_path).unwrap(),
            "old config body"
        );
        assert_eq!(std::fs::read_link(&link_path).unwrap(), decoy);
    }

    #[tokio::test]
    async fn test_failed_provision_leaves_nothing_when_pair_was_absent() {
        let dir = tempfile::tempdir().unwrap();
        let p = NginxProvisioner::new(test_config(dir.path(), "false", "true"));
        let site = test_site("a.test", &dir.path().join("root"), SiteRuntime::Static);

        p.provision(&site).await.unwrap_err();

        assert!(!dir.path().join("sites-available/a.test.conf").exists());
        assert!(!dir.path().join("sites-enabled/a.test.conf").exists());
    }

    #[tokio::test]
    async fn test_deprovision_removes_pair_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        let p = NginxProvisioner::new(test_config(dir.path(), "true", "true"));
        let site = test_site("a.test", &root, SiteRuntime::Static);

        p.provision(&site).await.unwrap();
        p.deprovision(&site).await.unwrap();
        assert!(!dir.path().join("sites-available/a.test.conf").exists());
        assert!(!dir.path().join("sites-enabled/a.test.conf").exists());

        // Second deprovision finds nothing to remove and still succeeds.
        p.deprovision(&site).await.unwrap();
    }

    #[tokio::test]
    async fn test_command_timeout_kills_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path(), "sleep 5", "true");
        cfg.command_timeout = Duration::from_millis(50);
        let p = NginxProvisioner::new(cfg);
        let site = test_site("a.test", &dir.path().join("root"), SiteRuntime::Static);

        let err = p.provision(&site).await.unwrap_err();
        assert!(matches!(err, ProvisionError::CommandTimeout { .. }));
    }

    #[tokio::test]
    async fn test_upsert_symlink_replaces_wrong_target() {
        let dir = tempfile::tempdir().unwrap();
        let target_a = dir.path().join("a");
        let target_b = dir.path().join("b");
        let link = dir.path().join("link");
        std::fs::write(&target_a, "a").unwrap();
        std::fs::write(&target_b, "b").unwrap();

        upsert_symlink(&target_a, &link).await.unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), target_a);

        upsert_symlink(&target_b, &link).await.unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), target_b);
    }
}
