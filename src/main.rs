use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use anime_shelf::images::ImageState;
use anime_shelf::state::projection::Listing;
use anime_shelf::transfer;
use anime_shelf::{
    AnimeFields, AnimeId, AnimeStatus, Config, HttpPosterSource, Library, Notifier, Session,
    WindowContext, WindowId,
};

/// Keep track of watched anime
#[derive(Parser)]
#[command(name = "anime-shelf", version, about)]
struct Cli {
    /// Config file (defaults to <config dir>/anime-shelf/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog database, overriding the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the catalog, best rated first
    List {
        /// Case-insensitive substring of the name
        #[arg(long, short)]
        search: Option<String>,
        /// Only these statuses (repeatable)
        #[arg(long = "status", short = 't')]
        statuses: Vec<AnimeStatus>,
    },
    /// Add a record
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 0)]
        score: u8,
        #[arg(long, default_value = "")]
        review: String,
        #[arg(long, default_value = "")]
        link: String,
        #[arg(long, default_value_t = AnimeStatus::None)]
        status: AnimeStatus,
    },
    /// Change fields of an existing record
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        score: Option<u8>,
        #[arg(long)]
        review: Option<String>,
        #[arg(long)]
        link: Option<String>,
        #[arg(long)]
        status: Option<AnimeStatus>,
    },
    /// Delete a record
    Remove { id: String },
    /// Create records from a JSON export
    Import { file: PathBuf },
    /// Write the catalog as JSON (defaults to anime-list-<date>.json)
    Export { file: Option<PathBuf> },
    /// Fetch and decode a poster, by record id or by link
    Poster {
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        link: Option<String>,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::discover()?,
    };
    if let Some(db) = cli.db {
        config.catalog.db_path = Some(db);
    }

    let db_path = config
        .db_path()
        .ok_or("could not determine a data directory for the catalog")?;
    let posters = HttpPosterSource::new(&config.images)?;
    let library = Library::open(&db_path, Box::new(posters))?;
    info!("Catalog at {}", db_path.display());

    let notifier = Notifier::new(&config.notifier);
    let mut session = Session::open(WindowContext {
        window: WindowId::new("main"),
        gateway: Arc::new(library),
        notifier,
        config,
    });

    let result = execute(&mut session, cli.command).await;
    session.close();
    result
}

async fn execute(session: &mut Session, command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::List { search, statuses } => {
            session.load().await?;
            session.set_search(search.unwrap_or_default());
            session.set_statuses(statuses);

            match session.listing() {
                Listing::NoData => println!("The catalog is empty."),
                Listing::NoResults => println!("Nothing matches."),
                Listing::Rows(rows) => {
                    for row in rows {
                        let id = row.id().map(AnimeId::as_str).unwrap_or("-");
                        println!(
                            "{:>2}  {:<9}  {}  [{}]",
                            row.fields.score, row.fields.status, row.fields.name, id
                        );
                    }
                }
            }
        }
        Command::Add {
            name,
            score,
            review,
            link,
            status,
        } => {
            let fields = AnimeFields::new(name, score)
                .with_review(review)
                .with_link(link)
                .with_status(status);
            let confirmed = session.create(fields).await?;
            println!("Added {}", confirmed.id());
        }
        Command::Edit {
            id,
            name,
            score,
            review,
            link,
            status,
        } => {
            let id = AnimeId::new(id);
            let mut anime = session
                .hydrate(&id)
                .await?
                .ok_or_else(|| format!("no record with id {}", id))?;

            if let Some(name) = name {
                anime.fields.name = name;
            }
            if let Some(score) = score {
                anime.fields.score = score;
            }
            if let Some(review) = review {
                anime.fields.review = review;
            }
            if let Some(link) = link {
                anime.fields.link = link;
            }
            if let Some(status) = status {
                anime.fields.status = status;
            }

            session.update(anime).await?;
            println!("Updated {}", id);
        }
        Command::Remove { id } => {
            let id = AnimeId::new(id);
            match session.delete(id.clone()).await? {
                anime_shelf::Confirmed::Deleted { existed: false, .. } => {
                    println!("{} was already gone", id)
                }
                _ => println!("Removed {}", id),
            }
        }
        Command::Import { file } => {
            let document = tokio::fs::read_to_string(&file).await?;
            let report = session.import(&document).await?;
            for failure in &report.failures {
                println!("  #{} {}: {}", failure.index, failure.name, failure.message);
            }
            println!("{}", report);
        }
        Command::Export { file } => {
            let file = file.unwrap_or_else(|| PathBuf::from(transfer::default_export_file_name()));
            let document = session.export().await?;
            tokio::fs::write(&file, document).await?;
            println!("Exported to {}", file.display());
        }
        Command::Poster { id, link } => {
            let id = id.map(AnimeId::new);
            let link = link.unwrap_or_default();
            match session.show_poster(id.as_ref(), &link).await {
                ImageState::Ready { handle, .. } => {
                    let image = handle.image();
                    println!(
                        "{}x{} {}",
                        image.width(),
                        image.height(),
                        image.content_type()
                    );
                }
                ImageState::Error { message, .. } => return Err(message.clone().into()),
                ImageState::Idle => println!("No poster: give a record id or --link"),
                ImageState::Loading(_) => {}
            }
        }
    }

    Ok(())
}
