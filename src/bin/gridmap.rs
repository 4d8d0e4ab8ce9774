//! gridmap operator tool
//!
//! Maps identities from the command line and manages pool leases

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use gridmap_rs::{AccountMapper, DistinguishedName, Fqan, MapperConfig, OrderedMappingTable};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gridmap")]
#[command(about = "Map grid identities to POSIX accounts")]
struct Args {
    /// Mapper configuration file
    #[arg(short = 'c', long, default_value = "/etc/gridmap/gridmap.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve an identity to an account (leases a pool account if needed)
    Map {
        /// Subject DN, slash or RFC2253 form
        #[arg(long)]
        dn: String,

        /// Primary FQAN
        #[arg(long)]
        fqan: Option<String>,

        /// Secondary FQANs, in order
        #[arg(long = "secondary")]
        secondary: Vec<String>,

        /// Give up waiting for the pool lock after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List current pool leases
    Leases {
        #[arg(long)]
        json: bool,
    },

    /// Drop the lease held by an identity
    Release {
        #[arg(long)]
        dn: String,

        #[arg(long)]
        fqan: Option<String>,

        #[arg(long = "secondary")]
        secondary: Vec<String>,
    },

    /// Release every expired lease now
    Reclaim,

    /// Validate a mapping file without loading any configuration
    Check { mapfile: PathBuf },
}

struct Identity {
    dn: DistinguishedName,
    primary: Option<Fqan>,
    secondary: Vec<Fqan>,
}

impl Identity {
    fn parse(dn: &str, fqan: Option<&str>, secondary: &[String]) -> Result<Self> {
        Ok(Identity {
            dn: DistinguishedName::parse(dn)?,
            primary: fqan.map(Fqan::parse).transpose()?,
            secondary: secondary
                .iter()
                .map(|s| Fqan::parse(s))
                .collect::<gridmap_rs::Result<_>>()?,
        })
    }
}

fn load_mapper(path: &Path) -> Result<AccountMapper> {
    let config = MapperConfig::load(path)?;
    let mapper = AccountMapper::from_config(&config)
        .with_context(|| format!("initializing mapper from {}", path.display()))?;
    Ok(mapper)
}

fn format_time(time: std::time::SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Map {
            dn,
            fqan,
            secondary,
            timeout_ms,
            json,
        } => {
            let mapper = load_mapper(&args.config)?;
            let id = Identity::parse(&dn, fqan.as_deref(), &secondary)?;
            let account = match timeout_ms {
                Some(ms) => mapper.map_to_account_with_timeout(
                    &id.dn,
                    id.primary.as_ref(),
                    &id.secondary,
                    Duration::from_millis(ms),
                ),
                None => mapper.map_to_account(&id.dn, id.primary.as_ref(), &id.secondary),
            }?;

            if json {
                println!("{}", serde_json::to_string_pretty(&account)?);
            } else {
                let groups: Vec<String> = account
                    .secondary_groups()
                    .iter()
                    .map(|g| format!("{}({})", g.name(), g.gid()))
                    .collect();
                println!(
                    "uid={}({}) gid={}({}) groups={}",
                    account.uid(),
                    account.login(),
                    account.primary_gid(),
                    account.primary_group().name(),
                    groups.join(",")
                );
            }
        }

        Command::Leases { json } => {
            let mapper = load_mapper(&args.config)?;
            let pools = mapper.pools();
            let leases = pools.leases()?;

            if json {
                let rows: Vec<serde_json::Value> = leases
                    .iter()
                    .map(|l| {
                        serde_json::json!({
                            "slot": l.slot,
                            "subject": l.subject.as_str(),
                            "since": DateTime::<Local>::from(l.since).to_rfc3339(),
                            "expired": pools.lease_expired(l),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for lease in &leases {
                    println!(
                        "{:<12} {}  {}{}",
                        lease.slot,
                        format_time(lease.since),
                        lease.subject,
                        if pools.lease_expired(lease) {
                            "  (expired)"
                        } else {
                            ""
                        }
                    );
                }
            }
        }

        Command::Release {
            dn,
            fqan,
            secondary,
        } => {
            let mapper = load_mapper(&args.config)?;
            let id = Identity::parse(&dn, fqan.as_deref(), &secondary)?;
            let key = mapper.lease_key(&id.dn, id.primary.as_ref(), &id.secondary);
            if mapper.pools().release(&key)? {
                println!("released lease of {}", key);
            } else {
                println!("{} holds no lease", key);
            }
        }

        Command::Reclaim => {
            let mapper = load_mapper(&args.config)?;
            let count = mapper.pools().reclaim_expired()?;
            info!("Reclaimed {} leases", count);
            println!("reclaimed {} expired leases", count);
        }

        Command::Check { mapfile } => {
            let table = OrderedMappingTable::load(&mapfile)?;
            let dn_entries = table.iter().filter(|e| e.pattern().is_dn()).count();
            println!(
                "{}: {} entries ({} DN, {} FQAN)",
                mapfile.display(),
                table.len(),
                dn_entries,
                table.len() - dn_entries
            );
        }
    }

    Ok(())
}
