//! Default locations and commands for a stock Debian/Ubuntu nginx host.

/// Default panel data directory.
pub const DATA_DIR: &str = "/var/lib/veranda";

/// State snapshot file name inside the data directory.
pub const STATE_FILE: &str = "veranda_state.json";

/// Directory holding all virtual-host config files.
pub const NGINX_AVAILABLE_DIR: &str = "/etc/nginx/sites-available";

/// Directory of symlinks to the enabled virtual hosts.
pub const NGINX_ENABLED_DIR: &str = "/etc/nginx/sites-enabled";

/// Command used to validate the nginx configuration before a reload.
pub const NGINX_TEST_COMMAND: &str = "nginx -t";

/// Command used to reload the running server.
pub const NGINX_RELOAD_COMMAND: &str = "systemctl reload nginx";

/// Timeout applied to each external nginx command.
pub const COMMAND_TIMEOUT_SECS: u64 = 30;

/// How long shutdown waits for the in-flight job before giving up.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Bounded capacity of the in-memory job queue.
pub const JOB_QUEUE_CAPACITY: usize = 256;
