//! Command line argument parsing
//!
//! Subcommands map one-to-one onto orchestrator and image operations:
//! - `start`, `stop`, `restart`: container lifecycle
//! - `log`, `ps`, `inspect`: container output and state
//! - `pull`, `push`, `build`, `images`, `remove`: image management
//! - `clean`: remove dangling images and stopped containers
//! - `events`: follow the daemon's lifecycle event feed
//! - `ping`, `show-config`: diagnostics

use crate::container::config::{parse_env_pair, parse_mapping};
use crate::container::{BuildOptions, NetworkMode, StartOptions, StopOptions};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// What the binary should do, with options already validated.
#[derive(Debug)]
pub enum Action {
    Start {
        name: String,
        options: StartOptions,
        detach: bool,
    },
    Stop {
        name: String,
        options: StopOptions,
    },
    Restart {
        name: String,
        options: StartOptions,
    },
    Log {
        name: String,
        all: bool,
    },
    Ps,
    Inspect {
        name: String,
    },
    Images,
    Pull {
        image: String,
    },
    Push {
        image: String,
    },
    Build {
        image: String,
        context: PathBuf,
        options: BuildOptions,
    },
    Remove {
        image: String,
    },
    Clean,
    Events {
        names: bool,
    },
    Ping,
    ShowConfig,
}

#[derive(Debug, Parser)]
#[command(name = "whale")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Idempotent container lifecycle management for Docker and Podman")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Daemon address, overrides configuration and DOCKER_HOST
    #[arg(short = 'H', long = "host", global = true)]
    pub host: Option<String>,
    /// Enable verbose output
    #[arg(long = "verbose", global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a container from an image
    Start {
        /// Image to run (`name@tag` or `name:tag`)
        image: String,
        /// Container name, defaults to the image
        alias: Option<String>,
        /// Return once the container is running instead of following its output
        #[arg(short = 'd', long = "detach")]
        detach: bool,
        /// Succeed if the container is already running
        #[arg(short = 'f', long = "force")]
        force: bool,
        /// Environment variable (KEY=VALUE)
        #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Published port (HOST:CONTAINER)
        #[arg(short = 'p', long = "port", value_name = "HOST:CONTAINER")]
        ports: Vec<String>,
        /// Bind mount (HOST:CONTAINER)
        #[arg(short = 'v', long = "volume", value_name = "HOST:CONTAINER")]
        volumes: Vec<String>,
        /// Network mode: host, bridge or none
        #[arg(long = "network")]
        network: Option<String>,
        /// DNS server (can be used multiple times)
        #[arg(long = "dns")]
        dns: Vec<String>,
        /// Command arguments passed to the container
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Stop and remove a container
    Stop {
        name: String,
        /// Succeed if the container does not exist
        #[arg(short = 'f', long = "force")]
        force: bool,
        /// Seconds to wait before killing
        #[arg(short = 'w', long = "wait")]
        wait: Option<u64>,
    },
    /// Recreate a container, keeping its image
    Restart { name: String },
    /// Follow a container's output
    Log {
        name: String,
        /// Replay output logged so far
        #[arg(short = 'a', long = "all")]
        all: bool,
    },
    /// List running containers
    Ps,
    /// Show a container's configuration and state
    Inspect { name: String },
    /// List tagged images
    Images,
    /// Pull an image
    Pull { image: String },
    /// Push an image
    Push { image: String },
    /// Build an image from the current directory
    Build {
        image: String,
        /// Build context directory
        #[arg(short = 'C', long = "context", default_value = ".")]
        context: PathBuf,
        /// Do not use the layer cache
        #[arg(long = "no-cache")]
        no_cache: bool,
    },
    /// Remove an image
    Remove { image: String },
    /// Remove dangling images and stopped containers
    Clean,
    /// Follow container lifecycle events
    Events {
        /// Resolve container names
        #[arg(short = 'n', long = "names")]
        names: bool,
    },
    /// Check the daemon is reachable
    Ping,
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn action(&self) -> Result<Action, String> {
        match &self.command {
            Some(Commands::Start {
                image,
                alias,
                detach,
                force,
                env,
                ports,
                volumes,
                network,
                dns,
                args,
            }) => {
                let mut builder = StartOptions::builder()
                    .image(image.clone())
                    .force(*force)
                    .args(args.clone());
                for pair in env {
                    let (key, value) = parse_env_pair(pair).map_err(|e| e.to_string())?;
                    builder = builder.env(key, value);
                }
                for mapping in ports {
                    let (container, host) = parse_mapping(mapping).map_err(|e| e.to_string())?;
                    builder = builder.port(container, host);
                }
                for mapping in volumes {
                    let (container, host) = parse_mapping(mapping).map_err(|e| e.to_string())?;
                    builder = builder.volume(container, host);
                }
                if let Some(network) = network {
                    let mode = network
                        .parse::<NetworkMode>()
                        .map_err(|e| e.to_string())?;
                    builder = builder.network(mode);
                }
                for server in dns {
                    builder = builder.dns(server.clone());
                }

                Ok(Action::Start {
                    name: alias.clone().unwrap_or_else(|| image.clone()),
                    options: builder.build().map_err(|e| e.to_string())?,
                    detach: *detach,
                })
            }
            Some(Commands::Stop { name, force, wait }) => Ok(Action::Stop {
                name: name.clone(),
                options: StopOptions {
                    force: *force,
                    wait: wait.map(Duration::from_secs),
                },
            }),
            Some(Commands::Restart { name }) => Ok(Action::Restart {
                name: name.clone(),
                options: StartOptions::default(),
            }),
            Some(Commands::Log { name, all }) => Ok(Action::Log {
                name: name.clone(),
                all: *all,
            }),
            Some(Commands::Ps) => Ok(Action::Ps),
            Some(Commands::Inspect { name }) => Ok(Action::Inspect { name: name.clone() }),
            Some(Commands::Images) => Ok(Action::Images),
            Some(Commands::Pull { image }) => Ok(Action::Pull {
                image: image.clone(),
            }),
            Some(Commands::Push { image }) => Ok(Action::Push {
                image: image.clone(),
            }),
            Some(Commands::Build {
                image,
                context,
                no_cache,
            }) => Ok(Action::Build {
                image: image.clone(),
                context: context.clone(),
                options: BuildOptions {
                    no_cache: *no_cache,
                },
            }),
            Some(Commands::Remove { image }) => Ok(Action::Remove {
                image: image.clone(),
            }),
            Some(Commands::Clean) => Ok(Action::Clean),
            Some(Commands::Events { names }) => Ok(Action::Events { names: *names }),
            Some(Commands::Ping) => Ok(Action::Ping),
            Some(Commands::ShowConfig) => Ok(Action::ShowConfig),
            None => Err(
                "No command specified. Use 'whale --help' to see available commands.".to_string(),
            ),
        }
    }
}
