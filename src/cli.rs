// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Flags describe one reverse tunnel; any of them may also come from ptu.yml.

use clap::Parser;
use ptu::config::Settings;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ptu")]
#[command(about = "Expose a private TCP service through a remote SSH server (reverse tunnel)")]
#[command(version)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// SSH server (host[:port]) to connect
    #[arg(short = 's', long = "server")]
    pub ssh_server: Option<String>,

    /// Username to connect SSH server [default: $USER]
    #[arg(short = 'u', long = "user")]
    pub ssh_username: Option<String>,

    /// Password to authenticate against SSH server (do not use, please; SSH agent is used without it)
    #[arg(short = 'p', long = "password")]
    pub ssh_password: Option<String>,

    /// Target host[:port] we will forward connections to [default: 127.0.0.1:80]
    #[arg(short = 't', long = "target")]
    pub target: Option<String>,

    /// Bind address (listener) to expose on the SSH server side [default: 0.0.0.0]
    #[arg(short = 'b', long = "bind")]
    pub exposed_bind: Option<String>,

    /// Port to expose and forward on the SSH server side
    #[arg(short = 'e', long = "expose", allow_negative_numbers = true)]
    pub exposed_port: Option<i64>,

    /// Config file [default: ./ptu.yml if present]
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Reject servers whose host key is not in known_hosts
    #[arg(long)]
    pub strict_host_keys: bool,

    /// known_hosts file to check against (implies --strict-host-keys)
    #[arg(long, value_name = "PATH")]
    pub known_hosts: Option<PathBuf>,

    /// Maximum number of concurrently relayed connections [default: unlimited]
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Flag values as a settings layer; unset flags stay `None`.
    pub fn settings(&self) -> Settings {
        Settings {
            ssh_server: self.ssh_server.clone(),
            ssh_username: self.ssh_username.clone(),
            ssh_password: self.ssh_password.clone(),
            target: self.target.clone(),
            exposed_bind: self.exposed_bind.clone(),
            exposed_port: self.exposed_port,
            strict_host_keys: self.strict_host_keys.then_some(true),
            known_hosts: self.known_hosts.clone(),
            max_connections: self.max_connections,
            ..Default::default()
        }
    }
}
