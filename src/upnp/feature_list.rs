// UPnP ContentDirectory X_GetFeatureList response parsing.
// Servers advertise per-feature container ids, e.g. where video items live.

use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureContainer {
    pub id: String,
    /// UPnP class, e.g. `object.item.videoItem`
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feature {
    pub name: String,
    pub version: Option<u32>,
    pub containers: Vec<FeatureContainer>,
}

fn attr(elem: &BytesStart, name: &[u8]) -> Option<String> {
    elem.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
}

/// Parse a `<Features>` document. The document may also arrive escaped inside
/// the `FeatureList` argument of a SOAP envelope.
pub fn parse_feature_list(xml: &str) -> Result<Vec<Feature>> {
    if let Some(inner) = soap_feature_list(xml)? {
        return parse_features(&inner);
    }
    parse_features(xml)
}

fn soap_feature_list(xml: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut inside = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"FeatureList" => inside = true,
            Ok(Event::Text(e)) if inside => {
                return Ok(Some(e.unescape().context("Invalid FeatureList text")?.into_owned()))
            }
            Ok(Event::CData(e)) if inside => {
                return Ok(Some(String::from_utf8_lossy(&e.into_inner()).into_owned()))
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"FeatureList" => return Ok(None),
            Ok(Event::Eof) => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Malformed XML at position {}", reader.buffer_position())
                })
            }
            _ => {}
        }
    }
}

fn parse_features(xml: &str) -> Result<Vec<Feature>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut features = Vec::new();
    let mut current: Option<Feature> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"Feature" => {
                    if let Some(done) = current.take() {
                        features.push(done);
                    }
                    let Some(name) = attr(&e, b"name") else {
                        tracing::debug!("Skipping unnamed feature");
                        continue;
                    };
                    current = Some(Feature {
                        name,
                        version: attr(&e, b"version").and_then(|v| v.parse().ok()),
                        containers: Vec::new(),
                    });
                }
                b"container" => {
                    if let (Some(feature), Some(id)) = (current.as_mut(), attr(&e, b"id")) {
                        feature.containers.push(FeatureContainer {
                            id,
                            kind: attr(&e, b"type").unwrap_or_default(),
                        });
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.local_name().as_ref() == b"Feature" => {
                if let Some(done) = current.take() {
                    features.push(done);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Malformed feature list at position {}", reader.buffer_position())
                })
            }
            _ => {}
        }
    }

    if let Some(done) = current.take() {
        features.push(done);
    }
    Ok(features)
}

/// Container ids advertised for video items, in document order
pub fn video_container_ids(features: &[Feature]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for container in features.iter().flat_map(|f| &f.containers) {
        if container.kind.starts_with("object.item.videoItem") && !ids.contains(&container.id) {
            ids.push(container.id.clone());
        }
    }
    ids
}
