//! Local copies of remote metadata (TheTVDB series bundles, TMDb movies)
//! so lookups and detail views keep working offline after the first fetch.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::{Actor, Banner, Episode, Movie, MovieImage, Series, SeriesBundle};

/// Store a full series refresh, replacing whatever was cached for that series
pub async fn save_series_bundle(pool: &SqlitePool, bundle: &SeriesBundle) -> Result<()> {
    let mut tx = pool.begin().await?;
    let series = &bundle.series;

    sqlx::query(
        r#"INSERT INTO tv_series
           (id, name, overview, first_aired, network, genres, rating, status, banner, fanart, poster)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET
              name = excluded.name,
              overview = excluded.overview,
              first_aired = excluded.first_aired,
              network = excluded.network,
              genres = excluded.genres,
              rating = excluded.rating,
              status = excluded.status,
              banner = excluded.banner,
              fanart = excluded.fanart,
              poster = excluded.poster,
              cached_at = CURRENT_TIMESTAMP"#,
    )
    .bind(series.id)
    .bind(&series.name)
    .bind(&series.overview)
    .bind(&series.first_aired)
    .bind(&series.network)
    .bind(&series.genres)
    .bind(series.rating)
    .bind(&series.status)
    .bind(&series.banner)
    .bind(&series.fanart)
    .bind(&series.poster)
    .execute(&mut *tx)
    .await?;

    for table in ["tv_episodes", "tv_banners", "tv_actors"] {
        sqlx::query(&format!("DELETE FROM {} WHERE series_id = ?", table))
            .bind(series.id)
            .execute(&mut *tx)
            .await?;
    }

    for episode in &bundle.episodes {
        sqlx::query(
            r#"INSERT OR REPLACE INTO tv_episodes
               (id, series_id, season, episode, name, overview, first_aired, rating, still)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(episode.id)
        .bind(series.id)
        .bind(episode.season)
        .bind(episode.episode)
        .bind(&episode.name)
        .bind(&episode.overview)
        .bind(&episode.first_aired)
        .bind(episode.rating)
        .bind(&episode.still)
        .execute(&mut *tx)
        .await?;
    }

    for banner in &bundle.banners {
        sqlx::query(
            r#"INSERT OR REPLACE INTO tv_banners
               (id, series_id, path, banner_type, banner_type2, language, rating, thumbnail)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(banner.id)
        .bind(series.id)
        .bind(&banner.path)
        .bind(&banner.banner_type)
        .bind(&banner.banner_type2)
        .bind(&banner.language)
        .bind(banner.rating)
        .bind(&banner.thumbnail)
        .execute(&mut *tx)
        .await?;
    }

    for actor in &bundle.actors {
        sqlx::query(
            r#"INSERT OR REPLACE INTO tv_actors (id, series_id, name, role, image, sort_order)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(actor.id)
        .bind(series.id)
        .bind(&actor.name)
        .bind(&actor.role)
        .bind(&actor.image)
        .bind(actor.sort_order)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::debug!(
        "Cached series {} ({}): {} episodes, {} banners, {} actors",
        series.name,
        series.id,
        bundle.episodes.len(),
        bundle.banners.len(),
        bundle.actors.len()
    );

    Ok(())
}

pub async fn get_series(pool: &SqlitePool, series_id: i64) -> Result<Option<Series>> {
    let series = sqlx::query_as::<_, Series>(
        r#"SELECT id, name, overview, first_aired, network, genres, rating, status, banner, fanart, poster
           FROM tv_series WHERE id = ?"#,
    )
    .bind(series_id)
    .fetch_optional(pool)
    .await?;
    Ok(series)
}

pub async fn find_episode(
    pool: &SqlitePool,
    series_id: i64,
    season: i32,
    episode: i32,
) -> Result<Option<Episode>> {
    let row = sqlx::query_as::<_, Episode>(
        r#"SELECT id, series_id, season, episode, name, overview, first_aired, rating, still
           FROM tv_episodes WHERE series_id = ? AND season = ? AND episode = ?"#,
    )
    .bind(series_id)
    .bind(season)
    .bind(episode)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn episodes_for_series(pool: &SqlitePool, series_id: i64) -> Result<Vec<Episode>> {
    let rows = sqlx::query_as::<_, Episode>(
        r#"SELECT id, series_id, season, episode, name, overview, first_aired, rating, still
           FROM tv_episodes WHERE series_id = ? ORDER BY season, episode"#,
    )
    .bind(series_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn banners_for_series(pool: &SqlitePool, series_id: i64) -> Result<Vec<Banner>> {
    let rows = sqlx::query_as::<_, Banner>(
        r#"SELECT id, series_id, path, banner_type, banner_type2, language, rating, thumbnail
           FROM tv_banners WHERE series_id = ? ORDER BY rating DESC"#,
    )
    .bind(series_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn actors_for_series(pool: &SqlitePool, series_id: i64) -> Result<Vec<Actor>> {
    let rows = sqlx::query_as::<_, Actor>(
        r#"SELECT id, series_id, name, role, image, sort_order
           FROM tv_actors WHERE series_id = ? ORDER BY sort_order"#,
    )
    .bind(series_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn cached_series_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM tv_series")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Drop a cached series and everything hanging off it
pub async fn forget_series(pool: &SqlitePool, series_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM tv_series WHERE id = ?")
        .bind(series_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn save_movie(pool: &SqlitePool, movie: &Movie, images: &[MovieImage]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"INSERT INTO movies
           (id, title, original_title, overview, release_date, runtime, rating, poster_path, backdrop_path, imdb_id)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET
              title = excluded.title,
              original_title = excluded.original_title,
              overview = excluded.overview,
              release_date = excluded.release_date,
              runtime = excluded.runtime,
              rating = excluded.rating,
              poster_path = excluded.poster_path,
              backdrop_path = excluded.backdrop_path,
              imdb_id = excluded.imdb_id,
              cached_at = CURRENT_TIMESTAMP"#,
    )
    .bind(movie.id)
    .bind(&movie.title)
    .bind(&movie.original_title)
    .bind(&movie.overview)
    .bind(&movie.release_date)
    .bind(movie.runtime)
    .bind(movie.rating)
    .bind(&movie.poster_path)
    .bind(&movie.backdrop_path)
    .bind(&movie.imdb_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM movie_images WHERE movie_id = ?")
        .bind(movie.id)
        .execute(&mut *tx)
        .await?;

    for image in images {
        sqlx::query(
            r#"INSERT OR REPLACE INTO movie_images
               (movie_id, image_type, file_path, width, height, language, vote_average)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(movie.id)
        .bind(&image.image_type)
        .bind(&image.file_path)
        .bind(image.width)
        .bind(image.height)
        .bind(&image.language)
        .bind(image.vote_average)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn get_movie(pool: &SqlitePool, movie_id: i64) -> Result<Option<Movie>> {
    let movie = sqlx::query_as::<_, Movie>(
        r#"SELECT id, title, original_title, overview, release_date, runtime, rating,
                  poster_path, backdrop_path, imdb_id
           FROM movies WHERE id = ?"#,
    )
    .bind(movie_id)
    .fetch_optional(pool)
    .await?;
    Ok(movie)
}

pub async fn images_for_movie(pool: &SqlitePool, movie_id: i64) -> Result<Vec<MovieImage>> {
    let rows = sqlx::query_as::<_, MovieImage>(
        r#"SELECT movie_id, image_type, file_path, width, height, language, vote_average
           FROM movie_images WHERE movie_id = ?
           ORDER BY image_type, vote_average DESC"#,
    )
    .bind(movie_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn last_update_time(pool: &SqlitePool) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT last_time FROM tv_update_state WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(t,)| t))
}

pub async fn set_last_update_time(pool: &SqlitePool, time: i64) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO tv_update_state (id, last_time) VALUES (1, ?)
           ON CONFLICT(id) DO UPDATE SET last_time = excluded.last_time"#,
    )
    .bind(time)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn bundle() -> SeriesBundle {
        SeriesBundle {
            series: Series {
                id: 80348,
                name: "Chuck".to_string(),
                poster: Some("posters/80348-1.jpg".to_string()),
                ..Default::default()
            },
            episodes: vec![
                Episode {
                    id: 1,
                    series_id: 80348,
                    season: 1,
                    episode: 1,
                    name: Some("Pilot".to_string()),
                    ..Default::default()
                },
                Episode {
                    id: 2,
                    series_id: 80348,
                    season: 1,
                    episode: 2,
                    name: Some("Chuck Versus the Helicopter".to_string()),
                    ..Default::default()
                },
            ],
            banners: vec![Banner {
                id: 10,
                series_id: 80348,
                path: "fanart/original/80348-1.jpg".to_string(),
                banner_type: Some("fanart".to_string()),
                ..Default::default()
            }],
            actors: vec![Actor {
                id: 20,
                series_id: 80348,
                name: "Zachary Levi".to_string(),
                role: Some("Chuck Bartowski".to_string()),
                ..Default::default()
            }],
        }
    }

    #[tokio::test]
    async fn test_series_bundle_replaces_previous_rows() {
        let pool = test_pool().await;
        save_series_bundle(&pool, &bundle()).await.unwrap();

        let mut refreshed = bundle();
        refreshed.episodes.truncate(1);
        save_series_bundle(&pool, &refreshed).await.unwrap();

        assert_eq!(episodes_for_series(&pool, 80348).await.unwrap().len(), 1);
        assert_eq!(banners_for_series(&pool, 80348).await.unwrap().len(), 1);
        assert_eq!(actors_for_series(&pool, 80348).await.unwrap().len(), 1);

        let pilot = find_episode(&pool, 80348, 1, 1).await.unwrap().unwrap();
        assert_eq!(pilot.name.as_deref(), Some("Pilot"));
        assert!(find_episode(&pool, 80348, 1, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forget_series_cascades() {
        let pool = test_pool().await;
        save_series_bundle(&pool, &bundle()).await.unwrap();

        assert_eq!(forget_series(&pool, 80348).await.unwrap(), 1);
        assert!(get_series(&pool, 80348).await.unwrap().is_none());
        assert!(episodes_for_series(&pool, 80348).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_movie_round_trip() {
        let pool = test_pool().await;
        let movie = Movie {
            id: 603,
            title: "The Matrix".to_string(),
            release_date: Some("1999-03-31".to_string()),
            ..Default::default()
        };
        let images = vec![MovieImage {
            movie_id: 603,
            image_type: "poster".to_string(),
            file_path: "/p.jpg".to_string(),
            ..Default::default()
        }];
        save_movie(&pool, &movie, &images).await.unwrap();

        assert_eq!(get_movie(&pool, 603).await.unwrap(), Some(movie));
        assert_eq!(images_for_movie(&pool, 603).await.unwrap(), images);
    }

    #[tokio::test]
    async fn test_update_time_upsert() {
        let pool = test_pool().await;
        assert_eq!(last_update_time(&pool).await.unwrap(), None);
        set_last_update_time(&pool, 100).await.unwrap();
        set_last_update_time(&pool, 200).await.unwrap();
        assert_eq!(last_update_time(&pool).await.unwrap(), Some(200));
    }
}
