// ABOUTME: Startup output for the CLI.
// ABOUTME: Prints the usage notice and the effective tunnel settings.

use crate::config::{Credentials, TunnelConfig};
use std::io::{self, Write};

/// Short notice shown before the settings.
pub const NOTICE: &str = "NB! Reverse tunnel is active while ptu runs. Press Ctrl+C to stop.";

/// Render the effective settings, one `label: value` per line.
pub fn settings_summary(config: &TunnelConfig) -> String {
    let auth = match &config.credentials {
        Credentials::Password(_) => "password",
        Credentials::Agent => "ssh-agent",
    };
    let rows = [
        ("SSH user", config.ssh_username.clone()),
        ("SSH server", config.ssh_server.to_string()),
        ("Auth", auth.to_string()),
        ("Exposed", config.exposed_host().to_string()),
        ("Connect to", config.connect_to().to_string()),
        ("Target", config.target.to_string()),
    ];
    rows.iter()
        .map(|(label, value)| format!("* {label:<11}{value}\n"))
        .collect()
}

/// Print notice and settings to stdout.
pub fn print_banner(config: &TunnelConfig) {
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{NOTICE}");
    let _ = writeln!(stdout);
    let _ = write!(stdout, "{}", settings_summary(config));
    let _ = stdout.flush();
}
