use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use vkshim_core::config::{default_config_path, LayerConfig};
use vkshim_core::ApiVersion;
use vkshim_layer::emulation::{ModuleRegistry, ModuleScope};
use vkshim_layer::entry_points::{EntryPoint, Level};
use vkshim_layer::manifest::build_manifest;

#[derive(Parser)]
#[command(name = "vkshim")]
#[command(about = "vkshim - Vulkan layer that emulates missing extensions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the loader JSON manifest for the layer library
    Manifest {
        /// Path of the layer shared library, as the loader should open it
        #[arg(short, long)]
        library_path: Option<String>,

        /// Vulkan API version the layer declares
        #[arg(short, long, default_value = "1.3")]
        api_version: ApiVersion,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List every entry point the layer knows about
    EntryPoints {
        /// Only show entry points resolved at this level
        #[arg(short, long)]
        level: Option<LevelArg>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the emulation modules and how the configuration affects them
    Modules {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LevelArg {
    Global,
    Instance,
    Device,
}

impl From<LevelArg> for Level {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Global => Level::Global,
            LevelArg::Instance => Level::Instance,
            LevelArg::Device => Level::Device,
        }
    }
}

fn main() -> anyhow::Result<()> {
    vkshim_common::logging::init_logging("warn");

    let cli = Cli::parse();

    match cli.command {
        Commands::Manifest {
            library_path,
            api_version,
            output,
        } => {
            let library_path =
                library_path.unwrap_or_else(|| format!("./{}", vkshim_common::platform::layer_library_name()));
            info!(
                platform = vkshim_common::platform::platform_name(),
                library = %library_path,
                "generating layer manifest"
            );

            let manifest = build_manifest(&ModuleRegistry::with_builtin(), &library_path, api_version);
            let json = manifest.to_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, format!("{}\n", json))?;
                    println!("Wrote {}", path.display());
                }
                None => println!("{}", json),
            }
        }

        Commands::EntryPoints { level, json } => {
            let level = level.map(Level::from);
            let selected: Vec<EntryPoint> = EntryPoint::ALL
                .iter()
                .copied()
                .filter(|ep| level.map_or(true, |l| ep.level() == l))
                .collect();

            if json {
                let entries: Vec<serde_json::Value> = selected
                    .iter()
                    .map(|ep| {
                        serde_json::json!({
                            "name": ep.name().to_string_lossy(),
                            "aliases": ep.aliases().iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>(),
                            "dispatch": format!("{:?}", ep.dispatch()),
                            "level": format!("{:?}", ep.level()),
                            "requirement": format!("{:?}", ep.requirement()),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for ep in &selected {
                    println!(
                        "{:<44} {:<9} {:<15} {:?}",
                        ep.name().to_string_lossy(),
                        format!("{:?}", ep.level()),
                        format!("{:?}", ep.dispatch()),
                        ep.requirement()
                    );
                    for alias in ep.aliases() {
                        println!("    alias {}", alias.to_string_lossy());
                    }
                }
                println!();
                println!("{} entry points", selected.len());
            }
        }

        Commands::Modules { config } => {
            let path = config.unwrap_or_else(default_config_path);
            let config = LayerConfig::load(&path).unwrap_or_else(|e| {
                eprintln!("Using default configuration ({}: {})", path, e);
                LayerConfig::default()
            });

            let registry = ModuleRegistry::with_builtin();
            for module in registry.modules() {
                let extension = module.extension().to_string_lossy();
                let status = if config.modules.is_disabled(&extension) {
                    "disabled"
                } else if config.modules.is_forced(&extension) {
                    "forced"
                } else {
                    "when missing"
                };
                let scope = match module.scope() {
                    ModuleScope::Device => "device",
                    ModuleScope::PhysicalDevice => "physical device",
                };

                println!("{} ({})", module.name(), extension);
                println!("    Scope:       {}", scope);
                println!("    Spec:        {}", module.spec_version());
                println!("    Precedence:  {}", module.precedence());
                println!("    Status:      {}", status);
                println!("    Handles:");
                for ep in module.entry_points() {
                    println!("      {}", ep.name().to_string_lossy());
                }
                println!();
            }
        }
    }

    Ok(())
}
