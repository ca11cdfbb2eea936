use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{FaceTemplate, Frame};
use facegate_engine::{
    spawn_engine, start_real_time_detection, Config, DetectionUpdate, EngineError, FaceAnalysis,
    ImageSequence, RealTimeConfig,
};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "facegate", about = "Face quality, liveness and identity matching")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the best face in an image and score its quality
    Detect {
        image: PathBuf,
        /// Fall back to a centered box when no detector finds a face
        #[arg(long)]
        best_effort: bool,
    },
    /// Run the real-time loop over a sequence of images
    Watch {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Number of updates to report before stopping
        #[arg(short, long, default_value_t = 10)]
        ticks: usize,
    },
    /// Compute a descriptor and append it to a template file
    Enroll {
        image: PathBuf,
        /// Identity the template belongs to
        #[arg(short, long)]
        owner: String,
        #[arg(short, long, default_value = "templates.json")]
        templates: PathBuf,
    },
    /// Match a face against a template file
    Verify {
        image: PathBuf,
        #[arg(short, long, default_value = "templates.json")]
        templates: PathBuf,
        /// Reject faces below the configured minimum quality
        #[arg(long)]
        enforce_quality: bool,
    },
    /// List enrolled templates
    List {
        #[arg(short, long, default_value = "templates.json")]
        templates: PathBuf,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    match &cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            return Ok(());
        }
        Commands::List { templates } => {
            let store = load_templates(templates)?;
            if store.is_empty() {
                println!("No templates in {}", templates.display());
            }
            for (i, t) in store.iter().enumerate() {
                println!(
                    "{i:>3}  {:<20} {}  dim={}",
                    t.owner_id,
                    t.created_at.format("%Y-%m-%d %H:%M:%S"),
                    t.descriptor.len()
                );
            }
            return Ok(());
        }
        _ => {}
    }

    let engine = spawn_engine(&config)?;

    match cli.command {
        Commands::Detect { image, best_effort } => {
            let frame = load_frame(&image)?;
            let analysis = if best_effort {
                engine.detect_face_best_effort(frame).await?
            } else {
                engine.detect_face_with_quality(frame).await?
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                match analysis {
                    Some(a) => print_analysis(&a),
                    None => println!("No face found"),
                }
            }
        }
        Commands::Watch { images, ticks } => {
            let source = ImageSequence::open(&images)?;
            let (tx, mut rx) = mpsc::unbounded_channel::<DetectionUpdate>();
            let handle = start_real_time_detection(
                engine,
                source,
                move |update| {
                    let _ = tx.send(update);
                },
                RealTimeConfig::from(&config),
            );

            let mut seen = 0;
            while seen < ticks {
                let Some(update) = rx.recv().await else { break };
                seen += 1;
                if cli.json {
                    println!("{}", serde_json::to_string(&update)?);
                } else {
                    print_update(&update);
                }
            }
            handle.join().await;
        }
        Commands::Enroll {
            image,
            owner,
            templates,
        } => {
            let result = engine.extract_embedding(load_frame(&image)?).await?;
            let Some(embedding) = result.embedding else {
                anyhow::bail!(
                    "liveness check failed (score {:.2}); try again with a live capture",
                    result.liveness.score
                );
            };
            let mut store = load_templates(&templates)?;
            store.push(FaceTemplate::new(owner.clone(), embedding.values));
            save_templates(&templates, &store)?;
            tracing::info!(owner = %owner, path = %templates.display(), count = store.len(), "template enrolled");
            println!(
                "Enrolled {owner} ({} templates in {})",
                store.len(),
                templates.display()
            );
        }
        Commands::Verify {
            image,
            templates,
            enforce_quality,
        } => {
            let store = load_templates(&templates)?;
            match engine.verify(load_frame(&image)?, store, enforce_quality).await {
                Ok(verdict) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&verdict)?);
                    } else {
                        println!(
                            "Match: {} (similarity {:.3})",
                            verdict.owner_id, verdict.similarity
                        );
                    }
                }
                Err(EngineError::MatchNotFound { best_similarity }) => {
                    println!("No match (best similarity {best_similarity:.3})");
                    std::process::exit(1);
                }
                Err(EngineError::LowQuality { overall, feedback }) => {
                    println!("Quality too low ({overall:.2}):");
                    for hint in feedback {
                        println!("  - {hint}");
                    }
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Config | Commands::List { .. } => {}
    }

    Ok(())
}

fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Frame::from_image(&image))
}

fn load_templates(path: &Path) -> Result<Vec<FaceTemplate>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn save_templates(path: &Path, templates: &[FaceTemplate]) -> Result<()> {
    let text = serde_json::to_string_pretty(templates)?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

fn print_analysis(a: &FaceAnalysis) {
    let d = &a.detection;
    let q = &a.quality;
    println!(
        "Face at ({:.0}, {:.0}) {:.0}x{:.0}, confidence {:.2} [{}]",
        d.x, d.y, d.width, d.height, d.confidence, d.source
    );
    println!(
        "Quality {:.2}  size {:.2}  position {:.2}  angle {:.2}  sharpness {:.2}  lighting {:.2}  symmetry {:.2}",
        q.overall, q.size, q.position, q.angle, q.sharpness, q.lighting, q.symmetry
    );
    for hint in a.feedback() {
        println!("  - {hint}");
    }
}

fn print_update(update: &DetectionUpdate) {
    match (&update.detection, &update.quality) {
        (Some(d), Some(q)) => println!(
            "#{:<4} frame {:<3} {} face, quality {:.2}{}  {}",
            update.tick,
            update.frame_sequence,
            d.source,
            q.overall,
            if update.has_acceptable_quality { " ok" } else { "" },
            q.messages().join("; ")
        ),
        _ => println!("#{:<4} frame {:<3} no face", update.tick, update.frame_sequence),
    }
}
