use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use manga_counts::catalog::{NewChapter, NewSeries};
use manga_counts::{App, CliArgs, Config, EntityKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "manga-counts")]
#[command(about = "Sharded counters and aggregate indexes for a manga catalog")]
struct Cli {
    #[arg(short, long, help = "Increase verbosity")]
    verbose: bool,

    #[arg(short, long, env = "MANGA_COUNTS_CONFIG", help = "Config file (TOML or JSON)")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Snapshot file backing the store")]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild counters and aggregates from the documents
    Backfill,
    /// Totals, growth and averages for every entity kind
    Stats,
    /// Total counter of one entity kind
    Count { kind: EntityKind },
    /// Number of chapters in a series, optionally within a number range
    Chapters {
        series_id: String,
        #[arg(long)]
        from: Option<f64>,
        #[arg(long)]
        to: Option<f64>,
    },
    /// View count of a series or chapter
    Views { id: String },
    /// Fill the store with demo content
    Seed {
        #[arg(long, default_value_t = 3)]
        series: usize,
        #[arg(long, default_value_t = 5)]
        chapters: usize,
        #[arg(long, default_value_t = 12)]
        pages: usize,
        #[arg(long, default_value_t = 8)]
        users: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_with_cli(&CliArgs {
        config_file: cli.config.clone(),
        snapshot: cli.snapshot.clone(),
        log_level: cli.verbose.then(|| "debug".to_string()),
    })
    .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let level = tracing::Level::from_str(&config.logging.level).unwrap_or(tracing::Level::INFO);
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!(operation = "startup", message = "manga-counts starting");

    let app = Arc::new(App::open(config).context("Failed to open store")?);
    let mutated = execute(&app, cli.command).await?;

    if mutated {
        app.save().context("Failed to save snapshot")?;
    }
    app.metrics.log_full_summary();

    Ok(())
}

/// Returns whether the command changed the store.
async fn execute(app: &Arc<App>, command: Command) -> Result<bool> {
    match command {
        Command::Backfill => {
            let report = app.backfill.run().context("Backfill failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(true)
        }
        Command::Stats => {
            let summary = app.analytics.current_summary()?;
            println!("{}", serde_json::to_string_pretty(&*summary)?);
            Ok(false)
        }
        Command::Count { kind } => {
            println!("{}", app.analytics.total(kind)?);
            Ok(false)
        }
        Command::Chapters {
            series_id,
            from,
            to,
        } => {
            let count = match (from, to) {
                (None, None) => app.analytics.chapters_in_series(&series_id)?,
                (from, to) => app.analytics.chapters_in_range(
                    &series_id,
                    from.unwrap_or(0.0),
                    to.unwrap_or(f64::MAX),
                )?,
            };
            println!("{}", count);
            Ok(false)
        }
        Command::Views { id } => {
            println!("{}", app.analytics.views(&id)?);
            Ok(false)
        }
        Command::Seed {
            series,
            chapters,
            pages,
            users,
        } => {
            seed(app, series, chapters, pages, users).await?;
            Ok(true)
        }
    }
}

async fn seed(
    app: &Arc<App>,
    series: usize,
    chapters: usize,
    pages: usize,
    users: usize,
) -> Result<()> {
    // Users sign up concurrently, the way webhook deliveries arrive.
    let mut signups = Vec::with_capacity(users);
    for i in 0..users {
        let app = Arc::clone(app);
        signups.push(tokio::task::spawn_blocking(move || {
            app.catalog.upsert_user(&format!("seed_user_{}", i))
        }));
    }
    let mut user_ids = Vec::with_capacity(users);
    for signup in signups {
        let (user, _) = signup.await?.context("Failed to create user")?;
        user_ids.push(user.id);
    }

    for s in 0..series {
        let created = app
            .catalog
            .create_series(NewSeries::new(format!("Seed Series {}", s + 1)))?;

        for c in 0..chapters {
            let storage: Vec<String> = (0..pages)
                .map(|p| format!("seed-{}-{}-{}", s, c, p))
                .collect();
            let (chapter, _) = app.catalog.create_chapter_with_pages(
                NewChapter {
                    series_id: created.id.clone(),
                    chapter_number: (c + 1) as f64,
                    title: None,
                },
                &storage,
            )?;
            app.catalog.record_chapter_view(&chapter.id)?;
        }

        for user_id in user_ids.iter().skip(s).step_by(2) {
            app.catalog.toggle_favorite(user_id, &created.id)?;
            app.catalog.record_series_view(&created.id)?;
        }
    }

    tracing::info!(
        operation = "seed",
        series = series,
        chapters = series * chapters,
        pages = series * chapters * pages,
        users = users,
    );
    Ok(())
}
