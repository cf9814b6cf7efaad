use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::RgbImage;
use infoengine_core::{EncodeError, Embedding, FaceEncoder, OnnxFaceEncoder};
use infoengine_faces::{Config, FaceError, FaceService, MatchOutcome};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "infoengine", about = "Information Engine face identity tool")]
struct Cli {
    /// TOML config file (defaults plus INFOENGINE_* variables otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from a photo containing their face
    Enroll {
        #[arg(short, long)]
        name: String,
        /// Free-text description shown on a match
        #[arg(short, long)]
        info: String,
        photo: PathBuf,
    },
    /// Identify the person in a photo
    Match { photo: PathBuf },
    /// List enrolled people
    List,
    /// Remove an enrolled person with their embedding and photo
    Remove { id: i64 },
    /// Show store counts and the effective configuration
    Status,
}

/// Loads the ONNX models on first use so that commands which never look
/// at a face work without them.
struct LazyEncoder {
    model_dir: PathBuf,
    inner: Option<OnnxFaceEncoder>,
}

impl FaceEncoder for LazyEncoder {
    fn encode(&mut self, image: &RgbImage) -> std::result::Result<Vec<Embedding>, EncodeError> {
        let encoder = match self.inner.take() {
            Some(encoder) => encoder,
            None => OnnxFaceEncoder::load(&self.model_dir)?,
        };
        let encoder = self.inner.insert(encoder);
        encoder.encode(image)
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    // Workflow failures stop here as a message; they never abort the process.
    Ok(match run(config, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    })
}

fn run(config: Config, command: Commands) -> std::result::Result<(), FaceError> {
    let encoder = LazyEncoder {
        model_dir: config.model_dir.clone(),
        inner: None,
    };
    let mut service = FaceService::open(config, encoder)?;

    match command {
        Commands::Enroll { name, info, photo } => {
            let person = service.enroll(&photo, &name, &info)?;
            println!("Person added successfully (id {}).", person.id);
        }
        Commands::Match { photo } => print_match(service.identify(&photo)?),
        Commands::List => {
            let people = service.people()?;
            if people.is_empty() {
                println!("No people enrolled");
            }
            for p in people {
                println!("{:>5}  {:<24}  {}", p.id, p.name, p.info);
            }
        }
        Commands::Remove { id } => {
            let removal = service.remove(id)?;
            if removal.is_noop() {
                println!("Nothing stored for id {id}");
            } else {
                println!(
                    "Removed id {id}: person={} embedding={} photos={}",
                    removal.person_deleted, removal.embedding_deleted, removal.photos_deleted
                );
            }
        }
        Commands::Status => {
            let status = service.status()?;
            println!(
                "{}",
                serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "stores": status,
                    "config": service.config(),
                })
            );
        }
    }

    Ok(())
}

fn print_match(outcome: MatchOutcome) {
    match outcome {
        MatchOutcome::Matched(m) => {
            println!("Name: {}", m.person.name);
            println!("Info: {}", m.person.info);
            println!("Distance: {:.4}", m.distance);
            println!("Photo: {}", m.photo.as_deref().map_or("missing".into(), display));
        }
        MatchOutcome::NoMatch => println!("No match found."),
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
