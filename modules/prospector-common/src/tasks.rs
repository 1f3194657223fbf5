use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProspectorError;
use crate::shard::{shard, ShardStrategy};

/// The fixed set of queues. Not a general broker: adding a queue means
/// adding a variant here and a matching `Task` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueueName {
    #[serde(rename = "gm-list")]
    GmList,
    #[serde(rename = "gm-details")]
    GmDetails,
    #[serde(rename = "enrichment")]
    Enrichment,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [Self::GmList, Self::GmDetails, Self::Enrichment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GmList => "gm-list",
            Self::GmDetails => "gm-details",
            Self::Enrichment => "enrichment",
        }
    }

    pub fn shard_strategy(&self) -> ShardStrategy {
        match self {
            Self::GmList => ShardStrategy::Geo,
            Self::GmDetails => ShardStrategy::Place,
            Self::Enrichment => ShardStrategy::Domain,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = ProspectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gm-list" => Ok(Self::GmList),
            "gm-details" => Ok(Self::GmDetails),
            "enrichment" => Ok(Self::Enrichment),
            other => Err(ProspectorError::Validation(format!("unknown queue: {other}"))),
        }
    }
}

/// Search a map viewport for places matching a phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeTask {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: f64,
    pub search_phrase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_id: Option<String>,
}

/// Fetch the detail page of a single place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailsTask {
    pub place_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_phrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_tile_id: Option<String>,
    #[serde(default)]
    pub force_refresh: bool,
}

/// Crawl a company website for contact details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentTask {
    pub domain: String,
    pub company_slug: String,
    #[serde(default)]
    pub force_refresh: bool,
}

/// A queued unit of work. Each variant belongs to exactly one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "queue")]
pub enum Task {
    #[serde(rename = "gm-list")]
    GmList(ScrapeTask),
    #[serde(rename = "gm-details")]
    GmDetails(DetailsTask),
    #[serde(rename = "enrichment")]
    Enrichment(EnrichmentTask),
}

impl Task {
    pub fn queue(&self) -> QueueName {
        match self {
            Self::GmList(_) => QueueName::GmList,
            Self::GmDetails(_) => QueueName::GmDetails,
            Self::Enrichment(_) => QueueName::Enrichment,
        }
    }

    /// Primary key within the queue, safe to use as a key segment.
    pub fn task_id(&self) -> String {
        let raw = match self {
            Self::GmList(t) => match &t.tile_id {
                Some(tile) => tile.clone(),
                None => format!("{}_{}_{}", t.latitude, t.longitude, t.zoom),
            },
            Self::GmDetails(t) => t.place_id.clone(),
            Self::Enrichment(t) => t.domain.trim().to_lowercase(),
        };
        sanitize_id(&raw)
    }

    /// The string the shard function is applied to.
    pub fn shard_identity(&self) -> String {
        match self {
            Self::GmList(t) => t.latitude.to_string(),
            Self::GmDetails(t) => t.place_id.clone(),
            Self::Enrichment(t) => t.domain.trim().to_lowercase(),
        }
    }

    pub fn shard(&self) -> String {
        shard(&self.shard_identity(), self.queue().shard_strategy())
    }

    /// Identities an operator may exclude: company slugs and domains.
    pub fn exclusion_keys(&self) -> Vec<String> {
        match self {
            Self::GmList(_) => Vec::new(),
            Self::GmDetails(t) => t.company_slug.iter().cloned().collect(),
            Self::Enrichment(t) => vec![t.company_slug.clone(), t.domain.trim().to_lowercase()],
        }
    }
}

/// Make an identifier usable as a single storage key segment.
pub fn sanitize_id(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(place_id: &str) -> Task {
        Task::GmDetails(DetailsTask {
            place_id: place_id.to_string(),
            name: None,
            company_slug: Some("acme".to_string()),
            discovery_phrase: None,
            discovery_tile_id: None,
            force_refresh: false,
        })
    }

    #[test]
    fn details_task_is_keyed_by_place_id() {
        let task = details("ChIJN1t_tDeuEmsRUsoyG83frY4");
        assert_eq!(task.queue(), QueueName::GmDetails);
        assert_eq!(task.task_id(), "ChIJN1t_tDeuEmsRUsoyG83frY4");
        assert_eq!(task.shard(), "1");
    }

    #[test]
    fn scrape_task_falls_back_to_coordinates() {
        let task = Task::GmList(ScrapeTask {
            latitude: 44.95,
            longitude: -93.09,
            zoom: 15.0,
            search_phrase: "coffee".to_string(),
            tile_id: None,
        });
        assert_eq!(task.task_id(), "44.95_-93.09_15");
        assert_eq!(task.shard(), "4");
    }

    #[test]
    fn enrichment_task_is_keyed_by_lowercased_domain() {
        let task = Task::Enrichment(EnrichmentTask {
            domain: " Acme.COM ".to_string(),
            company_slug: "acme".to_string(),
            force_refresh: false,
        });
        assert_eq!(task.task_id(), "acme.com");
        assert_eq!(task.shard().len(), 2);
        assert_eq!(task.exclusion_keys(), vec!["acme".to_string(), "acme.com".to_string()]);
    }

    #[test]
    fn serialized_task_carries_queue_tag() {
        let json = serde_json::to_value(details("place-123")).unwrap();
        assert_eq!(json["queue"], "gm-details");
        assert_eq!(json["place_id"], "place-123");

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.task_id(), "place-123");
    }

    #[test]
    fn unknown_queue_tag_is_rejected() {
        let raw = r#"{"queue":"gm-reviews","place_id":"x"}"#;
        assert!(serde_json::from_str::<Task>(raw).is_err());
    }

    #[test]
    fn ids_are_made_key_safe() {
        assert_eq!(sanitize_id("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_id(".."), "_");
        assert_eq!(sanitize_id(""), "_");
    }

    #[test]
    fn queue_names_parse() {
        for q in QueueName::ALL {
            assert_eq!(q.as_str().parse::<QueueName>().unwrap(), q);
        }
        assert!("gm-reviews".parse::<QueueName>().is_err());
    }
}
