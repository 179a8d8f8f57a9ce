use anyhow::{bail, Context, Result};
use clap::Parser;
use heronfs_client::{ClientConfig, HeronFuse};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "heronfs-mount", version, about = "Mount a HeronFS filesystem")]
struct Args {
    /// Mount point directory
    mount_point: PathBuf,

    /// Nameserver address (host:port)
    #[arg(short, long, value_name = "ADDRESS")]
    nameserver: Option<String>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Mount in read-only mode
    #[arg(short, long)]
    read_only: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Allow root to access the mount
    #[arg(long)]
    allow_root: bool,

    /// Delete files immediately instead of moving them to trash
    #[arg(long)]
    no_trash: bool,

    /// Use the shared session for all callers (pre-19 nameservers)
    #[arg(long)]
    legacy_protocol: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = match args.verbose {
        0 => "heronfs_client=info",
        1 => "heronfs_client=debug",
        _ => "heronfs_client=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig::default(),
    };

    // Command line overrides
    config.mount_point = args.mount_point;
    if let Some(nameserver) = &args.nameserver {
        let (host, port) = nameserver
            .rsplit_once(':')
            .context("nameserver address must be host:port")?;
        config.nameserver.host = host.to_string();
        config.nameserver.port = port.parse().context("invalid nameserver port")?;
    }
    if args.read_only {
        config.read_only = true;
    }
    if args.allow_other {
        config.allow_other = true;
    }
    if args.allow_root {
        config.allow_root = true;
    }
    if args.no_trash {
        config.use_trash = false;
    }
    if args.legacy_protocol {
        config.nameserver.legacy_protocol = true;
    }

    if !config.mount_point.exists() {
        bail!("mount point does not exist: {}", config.mount_point.display());
    }
    if !config.mount_point.is_dir() {
        bail!(
            "mount point is not a directory: {}",
            config.mount_point.display()
        );
    }

    info!("HeronFS gateway starting");
    info!("Nameserver: {}", config.nameserver.uri());
    info!("Mount point: {}", config.mount_point.display());
    info!("Read-only: {}", config.read_only);
    info!("Trash: {}", config.use_trash);

    let mut options = vec![
        fuser::MountOption::FSName("heronfs".to_string()),
        fuser::MountOption::Subtype("heronfs".to_string()),
        fuser::MountOption::DefaultPermissions,
        fuser::MountOption::AutoUnmount,
    ];
    if config.read_only {
        options.push(fuser::MountOption::RO);
    }
    if config.allow_other {
        options.push(fuser::MountOption::AllowOther);
    }
    if config.allow_root {
        options.push(fuser::MountOption::AllowRoot);
    }

    let mount_point = config.mount_point.clone();
    let fs = HeronFuse::new(config);

    info!("Mounting filesystem at {}", mount_point.display());

    // mount2 blocks its thread until unmount; the FUSE callbacks in turn
    // block on replies from the async workers on this runtime
    tokio::task::spawn_blocking(move || fuser::mount2(fs, &mount_point, &options))
        .await
        .context("mount task panicked")?
        .context("failed to mount filesystem")?;

    info!("Filesystem unmounted");
    Ok(())
}
