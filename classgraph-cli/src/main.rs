//! classgraph — headless client for collaborative class diagrams.
//!
//! Realtime commands (`watch`, `generate`, `generate-image`) join the
//! diagram over WebSocket through `classgraph-collab`'s runtime; the rest
//! call the REST backend.

mod live;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use classgraph_collab::{ArtifactTarget, BackendClient, ClientConfig, DiagramId, GenerationMode};

#[derive(Parser)]
#[command(name = "classgraph")]
#[command(about = "Collaborative class diagram client", long_about = None)]
struct Cli {
    /// Realtime endpoint (falls back to CLASSGRAPH_WS_URL)
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// REST backend (falls back to CLASSGRAPH_BACKEND_URL)
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Bearer token (falls back to CLASSGRAPH_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Join a diagram and print every change until interrupted
    Watch { id: DiagramId },
    /// Generate classes from a text prompt
    Generate {
        id: DiagramId,
        prompt: String,
        #[arg(long, value_enum, default_value_t = ModeArg::Merge)]
        mode: ModeArg,
    },
    /// Generate classes from an image of a diagram
    GenerateImage {
        id: DiagramId,
        image: PathBuf,
        /// Extra instructions sent with the image
        #[arg(long)]
        context: Option<String>,
        #[arg(long, value_enum, default_value_t = ModeArg::Merge)]
        mode: ModeArg,
    },
    /// List own and shared diagrams
    List,
    /// Print one diagram record
    Show { id: DiagramId },
    Create { name: String },
    Rename { id: DiagramId, name: String },
    Delete { id: DiagramId },
    /// Share a diagram with the user registered under `email`
    Share { id: DiagramId, email: String },
    /// Download a generated project archive
    Export {
        id: DiagramId,
        #[arg(long, value_enum, default_value_t = TargetArg::SpringBoot)]
        target: TargetArg,
        #[arg(long)]
        project_name: Option<String>,
        #[arg(long)]
        base_package: Option<String>,
        /// Output file (defaults to `<project>.zip`)
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Replace,
    Merge,
}

impl From<ModeArg> for GenerationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Replace => GenerationMode::Replace,
            ModeArg::Merge => GenerationMode::Merge,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetArg {
    SpringBoot,
    Flutter,
}

impl From<TargetArg> for ArtifactTarget {
    fn from(target: TargetArg) -> Self {
        match target {
            TargetArg::SpringBoot => ArtifactTarget::SpringBoot,
            TargetArg::Flutter => ArtifactTarget::Flutter,
        }
    }
}

impl Cli {
    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        if let Some(url) = &self.ws_url {
            config.ws_url = url.clone();
        }
        if let Some(url) = &self.backend_url {
            config.backend_url = url.clone();
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.config();

    match cli.command {
        Commands::Watch { id } => live::watch(config, id).await?,
        Commands::Generate { id, prompt, mode } => {
            live::generate(config, id, &prompt, mode.into()).await?
        }
        Commands::GenerateImage {
            id,
            image,
            context,
            mode,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("Failed to read {}", image.display()))?;
            live::generate_image(config, id, bytes, context, mode.into()).await?
        }
        command => backend(&config, command).await?,
    }

    Ok(())
}

async fn backend(config: &ClientConfig, command: Commands) -> Result<()> {
    let client = BackendClient::from_config(config).context("The REST commands need a token")?;

    match command {
        Commands::List => {
            let own = client.list_diagrams().await.context("Failed to list diagrams")?;
            let shared = client.list_shared().await.context("Failed to list shared diagrams")?;
            println!("Own diagrams ({}):", own.len());
            for diagram in &own {
                println!("  {:>6}  {}", diagram.id, diagram.name);
            }
            println!("Shared with me ({}):", shared.len());
            for diagram in &shared {
                println!("  {:>6}  {}", diagram.id, diagram.name);
            }
        }
        Commands::Show { id } => {
            let diagram = client.get_diagram(id).await?;
            println!("{}", serde_json::to_string_pretty(&diagram)?);
        }
        Commands::Create { name } => {
            let diagram = client.create_diagram(&name).await?;
            println!("Created diagram {} ({})", diagram.id, diagram.name);
        }
        Commands::Rename { id, name } => {
            let diagram = client.rename_diagram(id, &name).await?;
            println!("Diagram {} is now {}", diagram.id, diagram.name);
        }
        Commands::Delete { id } => {
            client.delete_diagram(id).await?;
            println!("Deleted diagram {id}");
        }
        Commands::Share { id, email } => {
            let user = client
                .share_with_email(id, &email)
                .await
                .with_context(|| format!("Failed to share diagram {id} with {email}"))?;
            println!("Shared diagram {id} with user {}", user.id);
        }
        Commands::Export {
            id,
            target,
            project_name,
            base_package,
            out,
        } => {
            let (project, bytes) = client
                .export_code(id, target.into(), project_name.as_deref(), base_package.as_deref())
                .await
                .context("Code generation failed")?;
            let path = out.unwrap_or_else(|| PathBuf::from(format!("{project}.zip")));
            std::fs::write(&path, &bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} bytes to {}", bytes.len(), path.display());
            println!("{}", path.display());
        }
        Commands::Watch { .. } | Commands::Generate { .. } | Commands::GenerateImage { .. } => {
            bail!("not a backend command")
        }
    }

    Ok(())
}
