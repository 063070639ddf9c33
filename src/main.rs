use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use newscache::config::Config;
use newscache::coordinator::{CacheCoordinator, Presentation};
use newscache::feed::{FeedClient, FeedSynchronizer, RefreshOutcome};
use newscache::storage::{Article, Database, DatabaseError};
use newscache::view::ViewSnapshot;

/// Get the config directory path (~/.config/newscache/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newscache"))
}

#[derive(Parser, Debug)]
#[command(
    name = "newscache",
    version,
    about = "Offline-first news cache with live, searchable pages"
)]
struct Args {
    /// Config file (default: ~/.config/newscache/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file (default: ~/.config/newscache/news.db)
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    /// Reset database (delete and recreate)
    #[arg(long, global = true)]
    reset_db: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a category and commit it to the cache
    Refresh { category: String },
    /// Print one page of cached articles
    List {
        category: String,
        /// Filter by title, author or source
        #[arg(long, short)]
        query: Option<String>,
        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Toggle the bookmark for an article id
    Bookmark { article_id: String },
    /// Print one page of bookmarked articles
    Bookmarks {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Follow a category live until Ctrl-C
    Watch {
        #[arg(long, short)]
        category: Option<String>,
        #[arg(long, short)]
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path).context("Failed to load config")?;
    config.validate().context("Invalid configuration")?;

    let db_path = match &args.db {
        Some(path) => path.clone(),
        None => {
            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)
                    .context("Failed to create config directory")?;
            }
            config_dir.join("news.db")
        }
    };

    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of newscache appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let page_size = config.page_size as i64;

    match args.command {
        Command::Refresh { category } => {
            warn_unknown_category(&config, &category);
            let sync = synchronizer(&config, db.clone())?;
            match sync.refresh(&category).await? {
                RefreshOutcome::Updated {
                    fetched,
                    upserted,
                    evicted,
                } => println!(
                    "{category}: fetched {fetched}, stored {upserted}, evicted {evicted}"
                ),
                outcome @ RefreshOutcome::Stale { .. } => {
                    let cached = db.count_articles(&category).await?;
                    println!(
                        "{} ({cached} cached articles kept)",
                        outcome.error_message().unwrap_or_default()
                    );
                }
            }
        }
        Command::List {
            category,
            query,
            page,
        } => {
            let offset = i64::from(page.saturating_sub(1)) * page_size;
            let articles = db
                .query_page(&category, query.as_deref().unwrap_or(""), offset, page_size)
                .await?;
            let bookmarked = db.bookmarked_ids().await?;
            if articles.is_empty() {
                println!("No cached articles for {category}. Try `newscache refresh {category}`.");
            }
            for article in &articles {
                print_article(article, bookmarked.contains(&article.article_id));
            }
        }
        Command::Bookmark { article_id } => {
            if db.toggle_bookmark(&article_id).await? {
                println!("Bookmarked {article_id}");
            } else {
                println!("Removed bookmark {article_id}");
            }
        }
        Command::Bookmarks { page } => {
            let offset = i64::from(page.saturating_sub(1)) * page_size;
            let articles = db.bookmarked_articles_page(offset, page_size).await?;
            let total = db.count_bookmarks().await?;
            println!("{total} bookmarks");
            for article in &articles {
                print_article(article, true);
            }
        }
        Command::Watch { category, query } => {
            let category = category.unwrap_or_else(|| config.default_category.clone());
            warn_unknown_category(&config, &category);
            let sync = synchronizer(&config, db.clone())?;
            let coordinator = CacheCoordinator::start(db, sync, config.paging(), &category)
                .await
                .context("Failed to start cache coordinator")?;
            if let Some(query) = query {
                coordinator.set_search_query(&query).await;
            }
            watch(&coordinator).await?;
            coordinator.shutdown().await;
        }
    }

    Ok(())
}

fn synchronizer(config: &Config, db: Database) -> Result<FeedSynchronizer> {
    let client = FeedClient::new(
        &config.feed_url,
        config.resolve_api_key(),
        config.fetch_options(),
    )
    .context("Failed to create feed client")?;
    Ok(FeedSynchronizer::new(db, client, config.keep_per_category))
}

fn warn_unknown_category(config: &Config, category: &str) {
    if !config.is_known_category(category) {
        tracing::warn!(category = %category, known = ?config.categories, "Category is not in the configured list");
    }
}

fn print_article(article: &Article, bookmarked: bool) {
    let published = chrono::DateTime::from_timestamp_millis(article.published_at)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let marker = if bookmarked { "*" } else { " " };
    println!(
        "{marker} {published}  {}  ({})",
        article.title, article.author
    );
    println!("    {}  {}", article.article_id, article.url);
}

fn print_snapshot(snapshot: &ViewSnapshot) {
    println!(
        "-- {} (rev {}, {} rows{}) --",
        snapshot.key,
        snapshot.revision,
        snapshot.len(),
        if snapshot.end_reached { "" } else { ", more" }
    );
    for item in snapshot.items.iter().take(10) {
        let marker = if item.is_bookmarked { "*" } else { " " };
        println!("{marker} {}  ({})", item.title, item.author);
    }
}

/// Print state and view changes until Ctrl-C.
async fn watch(coordinator: &CacheCoordinator) -> Result<()> {
    let mut state = coordinator.state();
    let mut feed = coordinator.feed_view().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Goodbye!");
                return Ok(());
            }
            changed = state.changed() => {
                changed.context("Coordinator stopped")?;
                let s = state.borrow_and_update().clone();
                println!(
                    "[{}] query={:?} refreshing={} error={}",
                    s.selected_category,
                    s.search_query,
                    s.is_refreshing,
                    s.error_message.as_deref().unwrap_or("-")
                );
            }
            changed = feed.changed() => {
                changed.context("Feed view stopped")?;
                let snapshot = feed.borrow_and_update().clone();
                if snapshot.loading {
                    continue;
                }
                print_snapshot(&snapshot);
                match Presentation::resolve(&coordinator.current_state(), &snapshot) {
                    Presentation::EmptyWithError(message) => {
                        println!("{message}. Nothing cached yet; retry with `newscache refresh`.");
                    }
                    Presentation::ContentWithError(message) => println!("(stale) {message}"),
                    Presentation::Empty => println!("Nothing cached yet."),
                    Presentation::Loading | Presentation::Content => {}
                }
            }
        }
    }
}
