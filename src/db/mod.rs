use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

pub mod metadata;

/// Open the SQLite pool with WAL and per-connection PRAGMAs
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        // NORMAL sync is safe with WAL and much faster
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                use sqlx::Executor;
                // Cache size: -16000 = 16MB (negative = KB)
                conn.execute("PRAGMA cache_size = -16000").await?;
                conn.execute("PRAGMA temp_store = MEMORY").await?;
                Ok(())
            })
        })
        .connect_with(connect_options)
        .await
        .with_context(|| format!("Failed to open database {}", database_url))?;

    tracing::info!("SQLite configured: WAL mode, 16MB cache (per connection)");

    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            media_uri TEXT NOT NULL UNIQUE,
            parent_uri TEXT,
            category TEXT NOT NULL,
            display_name TEXT NOT NULL,
            media_title TEXT NOT NULL,
            title TEXT NOT NULL,
            subtitle TEXT,
            artwork_uri TEXT,
            backdrop_uri TEXT,
            is_indexed INTEGER NOT NULL DEFAULT 0,
            last_position INTEGER NOT NULL DEFAULT 0,
            duration INTEGER NOT NULL DEFAULT 0,
            file_size INTEGER,
            series_id INTEGER,
            episode_id INTEGER,
            movie_id INTEGER,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- TheTVDB cache
        CREATE TABLE IF NOT EXISTS tv_series (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            overview TEXT,
            first_aired TEXT,
            network TEXT,
            genres TEXT,
            rating REAL,
            status TEXT,
            banner TEXT,
            fanart TEXT,
            poster TEXT,
            cached_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS tv_episodes (
            id INTEGER PRIMARY KEY,
            series_id INTEGER NOT NULL REFERENCES tv_series(id) ON DELETE CASCADE,
            season INTEGER NOT NULL,
            episode INTEGER NOT NULL,
            name TEXT,
            overview TEXT,
            first_aired TEXT,
            rating REAL,
            still TEXT
        );

        CREATE TABLE IF NOT EXISTS tv_banners (
            id INTEGER PRIMARY KEY,
            series_id INTEGER NOT NULL REFERENCES tv_series(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            banner_type TEXT,
            banner_type2 TEXT,
            language TEXT,
            rating REAL,
            thumbnail TEXT
        );

        CREATE TABLE IF NOT EXISTS tv_actors (
            id INTEGER PRIMARY KEY,
            series_id INTEGER NOT NULL REFERENCES tv_series(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            role TEXT,
            image TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS tv_lookups (
            query TEXT PRIMARY KEY,
            external_id INTEGER NOT NULL
        );

        -- Server time of the last TheTVDB updates feed we consumed
        CREATE TABLE IF NOT EXISTS tv_update_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_time INTEGER NOT NULL
        );

        -- TMDb cache
        CREATE TABLE IF NOT EXISTS movies (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            original_title TEXT,
            overview TEXT,
            release_date TEXT,
            runtime INTEGER,
            rating REAL,
            poster_path TEXT,
            backdrop_path TEXT,
            imdb_id TEXT,
            cached_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS movie_images (
            movie_id INTEGER NOT NULL REFERENCES movies(id) ON DELETE CASCADE,
            image_type TEXT NOT NULL,
            file_path TEXT NOT NULL,
            width INTEGER,
            height INTEGER,
            language TEXT,
            vote_average REAL,
            PRIMARY KEY (movie_id, file_path)
        );

        CREATE TABLE IF NOT EXISTS movie_lookups (
            query TEXT PRIMARY KEY,
            external_id INTEGER NOT NULL
        );

        -- Full-text search over media titles (external content, kept in sync by triggers)
        CREATE VIRTUAL TABLE IF NOT EXISTS media_search USING fts5(
            title,
            display_name,
            content='media',
            content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS media_search_ai AFTER INSERT ON media BEGIN
            INSERT INTO media_search(rowid, title, display_name)
            VALUES (new.id, new.title, new.display_name);
        END;

        CREATE TRIGGER IF NOT EXISTS media_search_ad AFTER DELETE ON media BEGIN
            INSERT INTO media_search(media_search, rowid, title, display_name)
            VALUES ('delete', old.id, old.title, old.display_name);
        END;

        CREATE TRIGGER IF NOT EXISTS media_search_au AFTER UPDATE OF title, display_name ON media BEGIN
            INSERT INTO media_search(media_search, rowid, title, display_name)
            VALUES ('delete', old.id, old.title, old.display_name);
            INSERT INTO media_search(rowid, title, display_name)
            VALUES (new.id, new.title, new.display_name);
        END;
        "#,
    )
    .execute(pool)
    .await?;

    create_indexes(pool).await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    let indexes = [
        // Children of a directory, sorted for display
        "CREATE INDEX IF NOT EXISTS idx_media_parent ON media(parent_uri, display_name COLLATE NOCASE)",
        // Category filters and indexed-directory forest
        "CREATE INDEX IF NOT EXISTS idx_media_category ON media(category, is_indexed)",
        "CREATE INDEX IF NOT EXISTS idx_media_series ON media(series_id) WHERE series_id IS NOT NULL",
        "CREATE INDEX IF NOT EXISTS idx_media_movie ON media(movie_id) WHERE movie_id IS NOT NULL",
        // Episode resolution by season/episode
        "CREATE INDEX IF NOT EXISTS idx_tv_episodes_number ON tv_episodes(series_id, season, episode)",
        "CREATE INDEX IF NOT EXISTS idx_tv_banners_series ON tv_banners(series_id)",
        "CREATE INDEX IF NOT EXISTS idx_tv_actors_series ON tv_actors(series_id, sort_order)",
        "CREATE INDEX IF NOT EXISTS idx_movie_images_movie ON movie_images(movie_id, image_type)",
    ];

    for index_sql in indexes {
        if let Err(e) = sqlx::query(index_sql).execute(pool).await {
            tracing::warn!("Failed to create index: {} - {}", index_sql, e);
        }
    }

    tracing::debug!("Database indexes created/verified");

    Ok(())
}

/// Release unused memory back to the OS
/// Call after large operations like full library rescans
pub async fn shrink_memory(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA shrink_memory").execute(pool).await?;
    tracing::debug!("SQLite memory shrunk");
    Ok(())
}

/// Rebuild the search index from scratch
/// If the FTS table is corrupted, it will be dropped and recreated
pub async fn rebuild_search_index(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Rebuilding media search index...");

    let rebuild = sqlx::query("INSERT INTO media_search(media_search) VALUES ('rebuild')")
        .execute(pool)
        .await;

    if let Err(e) = rebuild {
        tracing::warn!("Search table appears corrupted ({}), recreating...", e);

        sqlx::query("DROP TABLE IF EXISTS media_search")
            .execute(pool)
            .await
            .context("Failed to drop corrupted search table")?;

        sqlx::query(
            r#"CREATE VIRTUAL TABLE IF NOT EXISTS media_search USING fts5(
                title,
                display_name,
                content='media',
                content_rowid='id'
            )"#,
        )
        .execute(pool)
        .await
        .context("Failed to recreate search table")?;

        sqlx::query("INSERT INTO media_search(media_search) VALUES ('rebuild')")
            .execute(pool)
            .await?;
    }

    tracing::info!("Media search index rebuilt");
    Ok(())
}

/// Prepare a user query for FTS5
/// Converts "hello world" -> "\"hello\"* OR \"world\"*" for prefix matching
pub fn prepare_fts_query(query: &str) -> String {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter(|s| s.chars().count() >= 2)
        .filter_map(|s| {
            let escaped = s.replace(['"', '\'', '*'], "").replace('-', " ");
            let escaped = escaped.trim();
            // An empty phrase is a syntax error in FTS5
            (!escaped.is_empty()).then(|| format!("\"{}\"*", escaped))
        })
        .collect();

    terms.join(" OR ")
}

/// Fresh single-connection in-memory database for tests
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    pool
}
