// TheTVDB metadata provider service (legacy XML API)
// Series search, full series records with banners and actors, and the updates feed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::rate_limit::RateGate;
use crate::lookup::naming::normalize_query;
use crate::lookup::source::{SeriesSource, SeriesUpdates};
use crate::lookup::LookupError;
use crate::models::{Actor, Banner, Episode, Series, SeriesBundle};

const TVDB_API_BASE: &str = "https://thetvdb.com/api";
const TVDB_BANNER_BASE: &str = "https://thetvdb.com/banners";

pub struct TvdbClient {
    client: Client,
    api_key: String,
    language: String,
    gate: Arc<RateGate>,
}

/// Leaf elements of one XML record, keyed by element name
#[derive(Debug, Default, Clone)]
pub struct XmlRecord(HashMap<String, String>);

impl XmlRecord {
    pub fn text(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.text(key).and_then(|v| v.parse().ok())
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.text(key).and_then(|v| v.parse().ok())
    }
}

/// Collect every `<record>` element's direct text children
pub fn parse_records(xml: &str, record: &str) -> Result<Vec<XmlRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<XmlRecord> = None;
    let mut field: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == record {
                    current = Some(XmlRecord::default());
                } else if current.is_some() {
                    field = Some(name);
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(rec), Some(key)) = (current.as_mut(), field.as_ref()) {
                    let text = e.unescape().context("Invalid XML text")?;
                    rec.0.entry(key.clone()).or_default().push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let (Some(rec), Some(key)) = (current.as_mut(), field.as_ref()) {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    rec.0.entry(key.clone()).or_default().push_str(&text);
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == record.as_bytes() {
                    if let Some(rec) = current.take() {
                        records.push(rec);
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("XML error at {}: {}", reader.buffer_position(), e),
            _ => {}
        }
    }

    Ok(records)
}

/// Parse an `Updates.php` response: server time plus updated series ids
pub fn parse_updates(xml: &str) -> Result<SeriesUpdates> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut updates = SeriesUpdates::default();
    let mut field: Option<Vec<u8>> = None;
    let mut saw_time = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => field = Some(e.local_name().as_ref().to_vec()),
            Ok(Event::Text(e)) => {
                let text = e.unescape().context("Invalid XML text")?;
                match field.as_deref() {
                    Some(b"Time") => {
                        updates.time = text.trim().parse().context("Invalid update time")?;
                        saw_time = true;
                    }
                    Some(b"Series") => {
                        if let Ok(id) = text.trim().parse() {
                            updates.series.push(id);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => field = None,
            Ok(Event::Eof) => break,
            Err(e) => bail!("XML error at {}: {}", reader.buffer_position(), e),
            _ => {}
        }
    }

    if !saw_time {
        bail!("Updates response has no <Time> element");
    }
    Ok(updates)
}

fn series_from(rec: &XmlRecord) -> Option<Series> {
    Some(Series {
        id: rec.int("id").or_else(|| rec.int("seriesid"))?,
        name: rec.text("SeriesName")?,
        overview: rec.text("Overview"),
        first_aired: rec.text("FirstAired"),
        network: rec.text("Network"),
        genres: rec.text("Genre").map(|g| g.trim_matches('|').replace('|', ", ")),
        rating: rec.float("Rating"),
        status: rec.text("Status"),
        banner: rec.text("banner"),
        fanart: rec.text("fanart"),
        poster: rec.text("poster"),
    })
}

fn episode_from(rec: &XmlRecord, series_id: i64) -> Option<Episode> {
    Some(Episode {
        id: rec.int("id")?,
        series_id,
        season: i32::try_from(rec.int("SeasonNumber")?).ok()?,
        episode: i32::try_from(rec.int("EpisodeNumber")?).ok()?,
        name: rec.text("EpisodeName"),
        overview: rec.text("Overview"),
        first_aired: rec.text("FirstAired"),
        rating: rec.float("Rating"),
        still: rec.text("filename"),
    })
}

fn banner_from(rec: &XmlRecord, series_id: i64) -> Option<Banner> {
    Some(Banner {
        id: rec.int("id")?,
        series_id,
        path: rec.text("BannerPath")?,
        banner_type: rec.text("BannerType"),
        banner_type2: rec.text("BannerType2"),
        language: rec.text("Language"),
        rating: rec.float("Rating"),
        thumbnail: rec.text("ThumbnailPath"),
    })
}

fn actor_from(rec: &XmlRecord, series_id: i64) -> Option<Actor> {
    Some(Actor {
        id: rec.int("id")?,
        series_id,
        name: rec.text("Name")?,
        role: rec.text("Role"),
        image: rec.text("Image"),
        sort_order: rec
            .int("SortOrder")
            .and_then(|n| i32::try_from(n).ok())
            .unwrap_or(0),
    })
}

/// Parse the `all/<lang>.xml` payload into a bundle (banners and actors come separately)
pub fn parse_series_full(xml: &str) -> Result<SeriesBundle> {
    let series = parse_records(xml, "Series")?
        .first()
        .and_then(series_from)
        .context("Series record missing from response")?;
    let episodes = parse_records(xml, "Episode")?
        .iter()
        .filter_map(|r| episode_from(r, series.id))
        .collect();

    Ok(SeriesBundle {
        series,
        episodes,
        banners: Vec::new(),
        actors: Vec::new(),
    })
}

/// Choose the search hit whose name matches the query, else the first hit
pub fn pick_series(results: &[XmlRecord], show: &str) -> Option<i64> {
    let wanted = normalize_query(show);
    let id_of = |r: &XmlRecord| r.int("seriesid").or_else(|| r.int("id"));

    results
        .iter()
        .find(|r| {
            r.text("SeriesName")
                .map(|n| normalize_query(&n) == wanted)
                .unwrap_or(false)
        })
        .and_then(id_of)
        .or_else(|| results.first().and_then(id_of))
}

pub fn banner_url(path: &str) -> String {
    format!("{}/{}", TVDB_BANNER_BASE, path.trim_start_matches('/'))
}

impl TvdbClient {
    pub fn new(api_key: String, language: String, timeout: Duration, gate: Arc<RateGate>) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key,
            language,
            gate,
        }
    }

    async fn get_xml(&self, url: &str) -> Result<String> {
        self.gate.acquire().await;
        let body = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to reach TheTVDB ({})", url))?
            .error_for_status()
            .context("TheTVDB request failed")?
            .text()
            .await
            .context("Failed to read TheTVDB response")?;
        Ok(body)
    }

    pub async fn find_series(&self, name: &str) -> Result<Vec<XmlRecord>> {
        let url = format!(
            "{}/GetSeries.php?seriesname={}&language={}",
            TVDB_API_BASE,
            urlencoding::encode(name),
            self.language
        );
        let xml = self.get_xml(&url).await?;
        parse_records(&xml, "Series")
    }

    /// Full series record, every episode, banners and actors
    pub async fn series_bundle(&self, series_id: i64) -> Result<SeriesBundle> {
        let base = format!("{}/{}/series/{}", TVDB_API_BASE, self.api_key, series_id);

        let xml = self
            .get_xml(&format!("{}/all/{}.xml", base, self.language))
            .await?;
        let mut bundle = parse_series_full(&xml)?;

        let xml = self.get_xml(&format!("{}/banners.xml", base)).await?;
        bundle.banners = parse_records(&xml, "Banner")?
            .iter()
            .filter_map(|r| banner_from(r, series_id))
            .collect();

        let xml = self.get_xml(&format!("{}/actors.xml", base)).await?;
        bundle.actors = parse_records(&xml, "Actor")?
            .iter()
            .filter_map(|r| actor_from(r, series_id))
            .collect();

        tracing::debug!(
            "TheTVDB series {}: {} episodes, {} banners, {} actors",
            series_id,
            bundle.episodes.len(),
            bundle.banners.len(),
            bundle.actors.len()
        );

        Ok(bundle)
    }

    pub async fn fetch_updates(&self, since: Option<i64>) -> Result<SeriesUpdates> {
        let url = match since {
            Some(time) => format!("{}/Updates.php?type=all&time={}", TVDB_API_BASE, time),
            None => format!("{}/Updates.php?type=none", TVDB_API_BASE),
        };
        let xml = self.get_xml(&url).await?;
        parse_updates(&xml)
    }
}

#[async_trait]
impl SeriesSource for TvdbClient {
    async fn search_series(&self, show: &str) -> Result<Option<i64>, LookupError> {
        let results = self
            .find_series(show)
            .await
            .map_err(LookupError::from_upstream)?;
        Ok(pick_series(&results, show))
    }

    async fn fetch_series(&self, id: i64) -> Result<SeriesBundle, LookupError> {
        self.series_bundle(id)
            .await
            .map_err(LookupError::from_upstream)
    }

    async fn updates_since(&self, since: Option<i64>) -> Result<SeriesUpdates, LookupError> {
        self.fetch_updates(since)
            .await
            .map_err(LookupError::from_upstream)
    }

    fn banner_url(&self, path: &str) -> String {
        banner_url(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERIES_ALL: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<Data>
  <Series>
    <id>80348</id>
    <SeriesName>Chuck</SeriesName>
    <Overview>A computer geek &amp; spy.</Overview>
    <FirstAired>2007-09-24</FirstAired>
    <Network>NBC</Network>
    <Genre>|Action|Comedy|</Genre>
    <Rating>8.6</Rating>
    <Status>Ended</Status>
    <banner>graphical/80348-g9.jpg</banner>
    <fanart>fanart/original/80348-12.jpg</fanart>
    <poster>posters/80348-4.jpg</poster>
  </Series>
  <Episode>
    <id>332179</id>
    <SeasonNumber>1</SeasonNumber>
    <EpisodeNumber>1</EpisodeNumber>
    <EpisodeName>Pilot</EpisodeName>
    <Overview/>
    <filename>episodes/80348/332179.jpg</filename>
  </Episode>
  <Episode>
    <id>332180</id>
    <SeasonNumber>1</SeasonNumber>
    <EpisodeNumber>2</EpisodeNumber>
    <EpisodeName><![CDATA[Chuck Versus the Helicopter]]></EpisodeName>
  </Episode>
  <Episode>
    <id>broken</id>
  </Episode>
</Data>"#;

    #[test]
    fn test_parse_series_full() {
        let bundle = parse_series_full(SERIES_ALL).unwrap();
        assert_eq!(bundle.series.id, 80348);
        assert_eq!(bundle.series.name, "Chuck");
        assert_eq!(bundle.series.overview.as_deref(), Some("A computer geek & spy."));
        assert_eq!(bundle.series.genres.as_deref(), Some("Action, Comedy"));
        assert_eq!(bundle.series.rating, Some(8.6));

        assert_eq!(bundle.episodes.len(), 2);
        assert_eq!(bundle.episodes[0].name.as_deref(), Some("Pilot"));
        assert_eq!(bundle.episodes[0].overview, None);
        assert_eq!(
            bundle.episodes[1].name.as_deref(),
            Some("Chuck Versus the Helicopter")
        );
        assert!(bundle.episodes.iter().all(|e| e.series_id == 80348));
    }

    #[test]
    fn test_out_of_range_numbers_drop_the_episode() {
        let xml = r#"<Data>
  <Series><id>80348</id><SeriesName>Chuck</SeriesName></Series>
  <Episode><id>1</id><SeasonNumber>4294967297</SeasonNumber><EpisodeNumber>1</EpisodeNumber></Episode>
  <Episode><id>2</id><SeasonNumber>2</SeasonNumber><EpisodeNumber>3</EpisodeNumber></Episode>
</Data>"#;
        let bundle = parse_series_full(xml).unwrap();
        assert_eq!(bundle.episodes.len(), 1);
        assert_eq!(bundle.episodes[0].id, 2);
        assert_eq!(bundle.episodes[0].season, 2);
    }

    #[test]
    fn test_parse_banners_and_actors() {
        let banners = r#"<Banners>
            <Banner><id>1</id><BannerPath>fanart/original/80348-1.jpg</BannerPath>
              <BannerType>fanart</BannerType><BannerType2>1920x1080</BannerType2>
              <Language>en</Language><Rating>7.5</Rating></Banner>
            <Banner><id>2</id></Banner>
        </Banners>"#;
        let parsed: Vec<Banner> = parse_records(banners, "Banner")
            .unwrap()
            .iter()
            .filter_map(|r| banner_from(r, 80348))
            .collect();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].banner_type2.as_deref(), Some("1920x1080"));

        let actors = r#"<Actors><Actor><id>9</id><Image>actors/9.jpg</Image>
            <Name>Zachary Levi</Name><Role>Chuck Bartowski</Role><SortOrder>0</SortOrder></Actor></Actors>"#;
        let parsed: Vec<Actor> = parse_records(actors, "Actor")
            .unwrap()
            .iter()
            .filter_map(|r| actor_from(r, 80348))
            .collect();
        assert_eq!(parsed[0].name, "Zachary Levi");
        assert_eq!(parsed[0].role.as_deref(), Some("Chuck Bartowski"));
    }

    #[test]
    fn test_parse_updates() {
        let xml = "<Items><Time>1203923101</Time><Series>80348</Series><Series>73739</Series><Episode>332179</Episode></Items>";
        let updates = parse_updates(xml).unwrap();
        assert_eq!(updates.time, 1203923101);
        assert_eq!(updates.series, vec![80348, 73739]);

        let updates = parse_updates("<Items><Time>42</Time></Items>").unwrap();
        assert_eq!(updates.time, 42);
        assert!(updates.series.is_empty());

        assert!(parse_updates("<Items></Items>").is_err());
    }

    #[test]
    fn test_pick_series() {
        let xml = r#"<Data>
            <Series><seriesid>1</seriesid><SeriesName>The Office (UK)</SeriesName></Series>
            <Series><seriesid>2</seriesid><SeriesName>The Office (US)</SeriesName></Series>
        </Data>"#;
        let results = parse_records(xml, "Series").unwrap();
        assert_eq!(pick_series(&results, "The Office US"), Some(2));
        assert_eq!(pick_series(&results, "Office"), Some(1));
        assert_eq!(pick_series(&[], "Office"), None);
    }

    #[test]
    fn test_banner_url() {
        assert_eq!(
            banner_url("posters/80348-4.jpg"),
            "https://thetvdb.com/banners/posters/80348-4.jpg"
        );
    }
}
