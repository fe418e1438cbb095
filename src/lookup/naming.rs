//! Filename heuristics shared by classification and lookups.

use regex::Regex;
use std::sync::LazyLock;

static RE_SEASON_EP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[Ss](\d{1,2})[\s\.]?[Ee](\d{1,3})").unwrap());
static RE_CROSS_EP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s\.\-_])(\d{1,2})[xX](\d{2,3})(?:[\s\.\-_\[\(]|$)").unwrap()
});
static RE_DASH_EP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s-\s*[Ee]?(\d{1,3})(?:\s*[\[\(]|\s*$)").unwrap());
static RE_GROUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[.*?\]\s*[\-]?\s*").unwrap());
static RE_RELEASE_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)[\s\[\(]*\b(1080p|720p|480p|576p|2160p|4k|uhd|bluray|blu-ray|brrip|webrip|web-dl|hdtv|dvdrip|dvdscr|bdrip|xvid|divx|x264|x265|h\s?264|h\s?265|hevc|avc|aac|ac3|dts|atmos|10bit|hdr|remux|proper|repack|extended|unrated|multi|dual|dubbed|subbed)\b.*$",
    )
    .unwrap()
});
static RE_SPACE_COLLAPSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static RE_MOVIE_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)[\s\-]*[\(\[]?((?:19|20)\d{2})[\)\]]?(?:\s.*)?$").unwrap()
});
static RE_NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap());

/// Show name plus episode coordinates pulled from a file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeName {
    pub show: String,
    pub season: i32,
    pub episode: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieName {
    pub title: String,
    pub year: Option<i32>,
}

/// Drop a trailing file extension. Purely numeric suffixes are kept so
/// "Movie.1999" does not lose its year.
pub fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=4).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && ext.chars().any(|c| c.is_ascii_alphabetic()) =>
        {
            stem
        }
        _ => name,
    }
}

/// Lower-cased extension of a name or URI path, if any
pub fn extension_of(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem = strip_extension(last);
    if stem.len() == last.len() {
        return None;
    }
    Some(last[stem.len() + 1..].to_lowercase())
}

/// Parse "Show S01E05", "Show.1x05" and "[Group] Show - 05" style names
pub fn parse_episode_name(display_name: &str) -> Option<EpisodeName> {
    let name = strip_extension(display_name);

    let (season, episode, start) = if let Some(caps) = RE_SEASON_EP.captures(name) {
        (
            caps.get(1)?.as_str().parse().ok()?,
            caps.get(2)?.as_str().parse().ok()?,
            caps.get(0)?.start(),
        )
    } else if let Some(caps) = RE_CROSS_EP.captures(name) {
        let season: i32 = caps.get(1)?.as_str().parse().ok()?;
        if !(1..=30).contains(&season) {
            return None;
        }
        (season, caps.get(2)?.as_str().parse().ok()?, caps.get(0)?.start())
    } else if let Some(caps) = RE_DASH_EP.captures(name) {
        (1, caps.get(1)?.as_str().parse().ok()?, caps.get(0)?.start())
    } else {
        return None;
    };

    if episode < 1 {
        return None;
    }

    let show = clean_title(&name[..start]);
    if show.is_empty() {
        return None;
    }

    Some(EpisodeName {
        show,
        season,
        episode,
    })
}

/// Parse "The Matrix (1999)" or "The.Matrix.1999.1080p.BluRay" style names
pub fn parse_movie_name(display_name: &str) -> Option<MovieName> {
    let name = strip_extension(display_name);
    let name = RE_GROUP_TAG.replace(name, "");
    let name = name.replace(['.', '_'], " ");
    let name = RE_RELEASE_INFO.replace(&name, "");
    let name = RE_SPACE_COLLAPSE.replace_all(name.trim(), " ").to_string();

    if let Some(caps) = RE_MOVIE_YEAR.captures(&name) {
        let title = caps
            .get(1)
            .map(|m| m.as_str().trim_end_matches(['-', ' ', '(', '[']))
            .unwrap_or_default();
        let year = caps.get(2).and_then(|m| m.as_str().parse().ok());
        if !title.is_empty() {
            return Some(MovieName {
                title: title.to_string(),
                year,
            });
        }
    }

    let title = name.trim_end_matches(['-', ' ']);
    if title.is_empty() {
        return None;
    }
    Some(MovieName {
        title: title.to_string(),
        year: None,
    })
}

/// Key used for association caching: lower-case words separated by single spaces
pub fn normalize_query(name: &str) -> String {
    RE_NON_WORD
        .replace_all(&name.to_lowercase(), " ")
        .trim()
        .to_string()
}

fn clean_title(raw: &str) -> String {
    let name = RE_GROUP_TAG.replace(raw, "");
    let name = name.replace(['.', '_'], " ");
    let name = RE_RELEASE_INFO.replace(&name, "");
    let name = name.trim().trim_end_matches(['-', ' ', '_', '[', '(']);
    RE_SPACE_COLLAPSE.replace_all(name, " ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_standard_episode() {
        let parsed = parse_episode_name("Breaking Bad S01E05.mkv").unwrap();
        assert_eq!(parsed.show, "Breaking Bad");
        assert_eq!(parsed.season, 1);
        assert_eq!(parsed.episode, 5);

        let parsed = parse_episode_name("The.Office.US.s03e12.720p.HDTV.x264.avi").unwrap();
        assert_eq!(parsed.show, "The Office US");
        assert_eq!(parsed.season, 3);
        assert_eq!(parsed.episode, 12);
    }

    #[test]
    fn test_parse_cross_episode() {
        let parsed = parse_episode_name("Chuck.2x07.mkv").unwrap();
        assert_eq!(parsed.show, "Chuck");
        assert_eq!(parsed.season, 2);
        assert_eq!(parsed.episode, 7);
    }

    #[test]
    fn test_parse_group_tagged_episode() {
        let parsed = parse_episode_name(
            "[Reaktor] BECK - Mongolian Chop Squad - E01 [1080p][x265][10-bit].mkv",
        )
        .unwrap();
        assert_eq!(parsed.show, "BECK - Mongolian Chop Squad");
        assert_eq!(parsed.season, 1);
        assert_eq!(parsed.episode, 1);
    }

    #[test]
    fn test_movie_names_are_not_episodes() {
        assert!(parse_episode_name("Apollo 13.mkv").is_none());
        assert!(parse_episode_name("The Matrix (1999).mkv").is_none());
        assert!(parse_episode_name("S01E01.mkv").is_none());
    }

    #[test]
    fn test_parse_movie() {
        let parsed = parse_movie_name("The Matrix (1999).mkv").unwrap();
        assert_eq!(parsed.title, "The Matrix");
        assert_eq!(parsed.year, Some(1999));

        let parsed = parse_movie_name("Blade.Runner.2049.2017.1080p.BluRay.x264.mkv").unwrap();
        assert_eq!(parsed.title, "Blade Runner 2049");
        assert_eq!(parsed.year, Some(2017));

        let parsed = parse_movie_name("Amelie.avi").unwrap();
        assert_eq!(parsed.title, "Amelie");
        assert_eq!(parsed.year, None);
    }

    #[test]
    fn test_parse_movie_rejects_empty() {
        assert!(parse_movie_name("[Group] 1080p.mkv").is_none());
        assert!(parse_movie_name("1080p.mkv").is_none());
    }

    #[test]
    fn test_extension_helpers() {
        assert_eq!(strip_extension("Movie.1999"), "Movie.1999");
        assert_eq!(strip_extension("Movie.mkv"), "Movie");
        assert_eq!(extension_of("smb://nas/films/Heat.M4V"), Some("m4v".to_string()));
        assert_eq!(extension_of("smb://nas/films/Heat"), None);
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  The  Office (US) "), "the office us");
        assert_eq!(
            normalize_query("Marvel's Agents of S.H.I.E.L.D."),
            "marvel s agents of s h i e l d"
        );
    }
}
