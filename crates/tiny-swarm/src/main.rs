use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coordination::{
    Acquirer, Catalog, Evictor, HardwareProbe, HardwareProfile, PackageManager, ResourceRegistry,
    Selector,
};
use tiny_swarm::config::{self, SwarmConfig};
use tiny_swarm::ollama::{OllamaBackend, OllamaCli};
use tiny_swarm::probe::HostProbe;
use tiny_swarm::{Intent, Orchestrator, PythonRunner, RunReport};
use tracing::info;

#[derive(Parser)]
#[command(name = "tiny-swarm", version, about = "Coordinate a swarm of small local models")]
struct Cli {
    /// Config file (default: ~/.swarm-config/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle a goal: build it as a task or answer it as chat.
    Run {
        goal: String,
        /// Never download models.
        #[arg(long)]
        offline: bool,
        /// Skip intent detection.
        #[arg(long, value_enum)]
        mode: Option<Intent>,
    },
    /// Ask a question in chat mode.
    Chat { question: String },
    /// Forget the chat transcript.
    ClearHistory,
    #[command(subcommand)]
    Config(ConfigCommand),
    #[command(subcommand)]
    Models(ModelsCommand),
    /// Show detected hardware and the matching profile.
    Hardware,
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// Installed models and the configured defaults.
    List,
    Download { id: String },
    /// Remove swarm-downloaded models that see little use.
    Cleanup,
}

/// Everything a command may need, built once from the config.
struct Swarm {
    config: SwarmConfig,
    catalog: Arc<Catalog>,
    probe: Arc<dyn HardwareProbe>,
    packages: Arc<dyn PackageManager>,
    registry: Arc<ResourceRegistry>,
    evictor: Arc<Evictor>,
    acquirer: Arc<Acquirer>,
    profile: HardwareProfile,
}

impl Swarm {
    async fn assemble(config: SwarmConfig) -> Self {
        let catalog = Arc::new(Catalog::builtin());
        let probe: Arc<dyn HardwareProbe> = Arc::new(HostProbe::default());
        let packages: Arc<dyn PackageManager> = Arc::new(OllamaCli::new());
        let registry = Arc::new(ResourceRegistry::open(
            config.registry_path.clone(),
            Arc::clone(&packages),
        ));
        let evictor = Arc::new(Evictor::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
            Arc::clone(&probe),
        ));
        let mut acquirer = Acquirer::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
            config.auto_download,
        );
        if config.auto_cleanup {
            acquirer = acquirer.with_evictor(Arc::clone(&evictor));
        }
        let profile = HardwareProfile::detect(&probe.snapshot().await, config.hardware_profile);
        Self {
            config,
            catalog,
            probe,
            packages,
            registry,
            evictor,
            acquirer: Arc::new(acquirer),
            profile,
        }
    }

    fn orchestrator(self) -> Orchestrator {
        let selector = Arc::new(Selector::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.registry),
            Arc::clone(&self.acquirer),
            Arc::clone(&self.probe),
            self.profile.clone(),
        ));
        let backend = Arc::new(OllamaBackend::new(self.config.ollama_url.clone()));
        let run_log = config::config_dir().join("runs.jsonl");
        Orchestrator::new(backend, selector, Arc::new(PythonRunner::new()), self.config)
            .with_run_log(run_log)
    }

    fn keep_list(&self) -> Vec<String> {
        vec![
            self.config.coder_model(&self.profile),
            self.config.router_model.clone(),
        ]
    }
}

/// Print `report` and map it to the process status.
fn finish(report: &RunReport) -> ExitCode {
    print_report(report);
    ExitCode::from(exit_status(report))
}

fn exit_status(report: &RunReport) -> u8 {
    u8::from(!report.success)
}

fn print_report(report: &RunReport) {
    if let Some(answer) = &report.answer {
        println!("{answer}");
        return;
    }
    if report.success {
        println!("Task complete after {} iteration(s)", report.iterations);
    } else {
        println!(
            "Task failed after {} iteration(s): {}",
            report.iterations,
            report.reason.as_deref().unwrap_or("unknown reason")
        );
    }
    if let Some(artifact) = &report.artifact {
        println!("\n{artifact}");
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tiny_swarm::telemetry::init_tracing();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let mut config = SwarmConfig::load_or_create(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    match cli.command {
        Command::Config(ConfigCommand::Show) => {
            println!("# {}", config_path.display());
            print!("{}", config.to_toml()?);
        }
        Command::Config(ConfigCommand::Set { key, value }) => {
            config
                .set(&key, &value)
                .with_context(|| format!("setting {key}"))?;
            config.save(&config_path)?;
            println!("{key} updated");
        }
        Command::Hardware => {
            let swarm = Swarm::assemble(config).await;
            let snapshot = swarm.probe.snapshot().await;
            println!("RAM total:     {:.1} GB", snapshot.total_ram_gb());
            println!("RAM available: {} MB", snapshot.available_ram_mb);
            println!("CPU cores:     {}", snapshot.cpu_cores);
            println!("Disk free:     {} MB", snapshot.free_disk_mb);
            println!("Profile:       {}", swarm.profile.name);
            println!("Recommended:   {}", swarm.profile.recommended_model);
        }
        Command::Models(ModelsCommand::List) => {
            let swarm = Swarm::assemble(config).await;
            let installed = swarm
                .packages
                .list()
                .await
                .context("listing installed models")?;
            for id in &installed {
                let tag = if swarm.registry.is_swarm_acquired(id) {
                    " (swarm)"
                } else {
                    ""
                };
                println!("{id}{tag}  uses={}", swarm.registry.usage_count(id));
            }
            println!("default: {}", swarm.config.coder_model(&swarm.profile));
            println!("router:  {}", swarm.config.router_model);
        }
        Command::Models(ModelsCommand::Download { id }) => {
            let swarm = Swarm::assemble(config).await;
            if !swarm.catalog.contains(&id) {
                bail!("{id} is not in the catalog");
            }
            if !swarm.acquirer.ensure_available(&id, true).await {
                bail!("could not download {id}");
            }
            println!("{id} ready");
        }
        Command::Models(ModelsCommand::Cleanup) => {
            let swarm = Swarm::assemble(config).await;
            let keep = swarm.keep_list();
            let removed = swarm.evictor.cleanup_unused(&keep).await;
            println!("Removed {removed} model(s)");
        }
        Command::ClearHistory => {
            let mut orchestrator = Swarm::assemble(config).await.orchestrator();
            orchestrator
                .clear_history()
                .context("clearing conversation history")?;
            println!("History cleared");
        }
        Command::Chat { question } => {
            let mut orchestrator = Swarm::assemble(config).await.orchestrator();
            let report = orchestrator.run(&question, false, Some(Intent::Chat)).await;
            return Ok(finish(&report));
        }
        Command::Run {
            goal,
            offline,
            mode,
        } => {
            let swarm = Swarm::assemble(config).await;
            info!(profile = %swarm.profile.name, "Hardware profile");
            let mut orchestrator = swarm.orchestrator();
            let report = orchestrator.run(&goal, offline, mode).await;
            return Ok(finish(&report));
        }
    }
    Ok(ExitCode::SUCCESS)
}
