use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use aoimap::{
    compositor,
    edit_session::CommandEditor,
    polygon_metadata, Config, EditOutcome, Session, Sinks, Stored,
};
use clap::{Parser, Subcommand};
use tracing::Level;

/// Mark an area of interest on photos and file them under the nearest reference map
#[derive(Parser)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, action, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the GPS position and stored polygon of a photo
    Show { photo: PathBuf },
    /// List the reference maps nearest to a photo
    Suggest {
        photo: PathBuf,
        /// Directory holding the reference maps
        #[arg(short, long)]
        maps: PathBuf,
        /// How many maps to list
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Store a polygon given as x,y points; fewer than three removes it
    SetPolygon {
        photo: PathBuf,
        #[arg(value_parser = parse_point, allow_hyphen_values = true)]
        points: Vec<[f64; 2]>,
    },
    /// Remove the stored polygon
    Clear { photo: PathBuf },
    /// Paint the stored polygon into the pixels
    Bake { photo: PathBuf },
    /// Edit the polygon with the configured external editor
    Edit { photo: PathBuf },
    /// Save the polygon, bake it and rename the photo after its reference map
    Commit {
        photo: PathBuf,
        /// Directory holding the reference maps
        #[arg(short, long)]
        maps: PathBuf,
        /// Location ID to file the photo under; defaults to the nearest map's
        #[arg(short = 'i', long)]
        location_id: Option<String>,
        #[arg(long, action)]
        no_bake: bool,
    },
}

fn parse_point(s: &str) -> Result<[f64; 2], String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got {:?}", s))?;
    let x = x.trim().parse::<f64>().map_err(|e| e.to_string())?;
    let y = y.trim().parse::<f64>().map_err(|e| e.to_string())?;
    Ok([x, y])
}

fn main() {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

fn print_polygon(stored: Option<&aoimap::Polygon>) {
    match stored {
        Some(polygon) => {
            let points: Vec<String> = polygon
                .points()
                .iter()
                .map(|[x, y]| format!("{},{}", x, y))
                .collect();
            println!("polygon: {}", points.join(" "));
        }
        None => println!("polygon: none"),
    }
}

fn run(args: Cli) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Show { photo } => {
            let session = Session::open(&photo, config, Sinks::default())?;
            match session.coordinate() {
                Some(coordinate) => println!("position: {}", coordinate),
                None => println!("position: unknown"),
            }
            print_polygon(session.polygon());
        }
        Command::Suggest {
            photo,
            maps,
            limit,
        } => {
            if let Some(limit) = limit {
                config.suggestion_limit = limit;
                config.validate()?;
            }
            let mut session = Session::open(&photo, config, Sinks::default())?;
            if session.coordinate().is_none() {
                bail!("{} has no GPS position", photo.display());
            }
            for ranked in session.suggest(&maps)? {
                let id = ranked
                    .map
                    .location_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| String::from("-----"));
                println!("{:>9.2} km  {}  {}", ranked.distance_km, id, ranked.map.name);
            }
        }
        Command::SetPolygon { photo, points } => {
            match polygon_metadata::store(&photo, &points)? {
                Stored::Written(polygon) => print_polygon(Some(&polygon)),
                Stored::Removed => println!("polygon removed"),
            }
        }
        Command::Clear { photo } => {
            polygon_metadata::remove(&photo)?;
            println!("polygon removed");
        }
        Command::Bake { photo } => {
            let Some(polygon) = polygon_metadata::read(&photo)? else {
                bail!("{} has no stored polygon", photo.display());
            };
            compositor::bake(&photo, &polygon, &config.bake_style(), config.jpeg_quality)?;
            println!("baked {}", photo.display());
        }
        Command::Edit { photo } => {
            let mut editor = CommandEditor::from_config(&config.editor)
                .context("no polygon editor configured (editor.program)")?;
            let mut session = Session::open(&photo, config, Sinks::default())?;
            match session.edit_polygon(&mut editor)? {
                EditOutcome::Accepted(points) => {
                    match polygon_metadata::store(session.photo(), &points)? {
                        Stored::Written(polygon) => print_polygon(Some(&polygon)),
                        Stored::Removed => println!("polygon removed"),
                    }
                }
                EditOutcome::Cancelled => println!("edit cancelled"),
            }
        }
        Command::Commit {
            photo,
            maps,
            location_id,
            no_bake,
        } => {
            if no_bake {
                config.bake_on_commit = false;
            }
            let mut session = Session::open(&photo, config, Sinks::default())?;
            match location_id {
                Some(text) => {
                    session.set_location_id_text(&text)?;
                }
                None => {
                    session.suggest(&maps)?;
                }
            }

            let report = session.commit(Some(&maps))?;
            match &report.stored {
                Stored::Written(polygon) => print_polygon(Some(polygon)),
                Stored::Removed => println!("polygon: none"),
            }
            for warning in report.warnings() {
                eprintln!("warning: {}", warning);
            }
            println!("photo: {}", session.photo().display());
        }
    }

    Ok(())
}
