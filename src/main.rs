//! archoffline - offline Arch Linux ISO builder.
//!
//! Adapts an archiso template so the resulting image carries its own
//! package repository:
//! - packages (and AUR builds) are downloaded into `airootfs/root/<repo>/`
//! - pacman in the image only reads from that repository
//! - mkarchiso produces the bootable ISO

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use archoffline::commands;
use archoffline::config::{split_profiles, split_resources, split_words, Config, MirrorMode};

#[derive(Parser)]
#[command(name = "archoffline")]
#[command(about = "Offline Arch Linux ISO builder")]
#[command(
    after_help = "QUICK START:\n  archoffline preflight                      Check all dependencies\n  archoffline build --mirrors=Sweden         Build the ISO\n  archoffline run                            Boot in QEMU\n  archoffline clean                          Remove work/ and out/"
)]
struct Cli {
    /// Build directory (default: ./archiso_offline/)
    #[arg(long, global = true)]
    builddir: Option<PathBuf>,

    /// Name of the repository embedded in the image
    #[arg(long, global = true)]
    repo: Option<String>,

    /// Show external tool output and debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the offline ISO
    Build(BuildArgs),

    /// Boot the newest ISO in QEMU (UEFI, 15G scratch disk)
    Run,

    /// Clean build artifacts (default: keeps the repository cache)
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run preflight checks (verify all dependencies before build)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// archiso template to adapt (default: releng)
    #[arg(long)]
    template: Option<String>,

    /// Mirror region, `copy`, an http(s) server, or a local mirror path
    #[arg(long)]
    mirrors: Option<String>,

    /// Extra packages, space separated
    #[arg(long)]
    packages: Option<String>,

    /// AUR packages to build from source, space separated
    #[arg(long)]
    aur_packages: Option<String>,

    /// Account used for AUR builds (default: aoffline_usr)
    #[arg(long)]
    aur_user: Option<String>,

    /// Start from a fresh build directory
    #[arg(long)]
    rebuild: bool,

    /// Keep the downloaded repository across --rebuild
    #[arg(long)]
    save_cache: bool,

    /// Pause before running mkarchiso
    #[arg(long)]
    breakpoint: bool,

    /// Boot the ISO in QEMU when the build finishes
    #[arg(long)]
    boot: bool,

    /// Ship archinstall from git and start it on login
    #[arg(long)]
    archinstall: bool,

    /// archinstall branch to clone (default: master)
    #[arg(long)]
    ai_branch: Option<String>,

    /// archinstall profiles to ship, comma separated (implies --archinstall)
    #[arg(long)]
    profiles: Option<String>,

    /// Files, URLs or git repositories for /root/resources, `;` separated
    #[arg(long)]
    resources: Option<String>,

    /// Script run by archiso while building the image
    #[arg(long)]
    customize: Option<PathBuf>,

    /// Command run on login on the first console
    #[arg(long)]
    autorun: Option<String>,

    /// Don't check package names against the sync databases
    #[arg(long)]
    skip_validation: bool,

    /// Ask for a mirror region and extra packages when not given
    #[arg(long)]
    interactive: bool,
}

impl BuildArgs {
    fn apply(self, config: &mut Config) {
        if let Some(template) = self.template {
            config.template = template;
        }
        if let Some(mirrors) = self.mirrors {
            config.mirrors = MirrorMode::parse(Some(&mirrors));
        }
        if let Some(packages) = self.packages {
            config.packages = split_words(&packages);
        }
        if let Some(aur_packages) = self.aur_packages {
            config.aur_packages = split_words(&aur_packages);
        }
        if let Some(aur_user) = self.aur_user {
            config.aur_user = aur_user;
        }
        if let Some(branch) = self.ai_branch {
            config.ai_branch = branch;
        }
        if let Some(profiles) = self.profiles {
            config.profiles = split_profiles(&profiles);
        }
        if let Some(resources) = self.resources {
            config.resources = split_resources(&resources);
        }
        config.customize = self.customize;
        config.autorun = self.autorun;
        config.rebuild = self.rebuild;
        config.save_cache = self.save_cache;
        config.breakpoint = self.breakpoint;
        config.boot = self.boot;
        config.archinstall = self.archinstall || !config.profiles.is_empty();
        config.interactive = self.interactive;
        if self.skip_validation {
            config.validate_packages = false;
        }
    }
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show the build directory state
    Status,
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Remove the whole build directory, repository cache included
    All,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    let mut config = Config::load();
    if let Some(dir) = &cli.builddir {
        config.set_build_dir(dir);
    }
    if let Some(repo) = cli.repo {
        config.repo_name = repo;
    }
    config.verbose = cli.verbose;

    match cli.command {
        Commands::Build(args) => {
            args.apply(&mut config);
            commands::cmd_build(&config)?;
        }

        Commands::Run => {
            commands::cmd_run(&config)?;
        }

        Commands::Clean { what } => {
            let clean_target = match what {
                None => commands::clean::CleanTarget::Outputs,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(&config, clean_target)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Status => commands::show::ShowTarget::Status,
            };
            commands::cmd_show(&config, show_target)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }
    }

    Ok(())
}
