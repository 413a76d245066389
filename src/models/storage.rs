use serde::{Deserialize, Serialize};

/// Storage buckets the console writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bucket {
    Avatars,
    AdsImages,
    /// Per-trainer bucket, keyed by the trainer identifier.
    Trainer(String),
}

impl Bucket {
    pub fn name(&self) -> String {
        match self {
            Bucket::Avatars => "avatars".into(),
            Bucket::AdsImages => "ads-images".into(),
            Bucket::Trainer(id) => format!("trainer-{}", id.to_lowercase().replace('_', "-")),
        }
    }

    /// Metric label; trainer buckets share one.
    pub fn kind(&self) -> &'static str {
        match self {
            Bucket::Avatars => "avatars",
            Bucket::AdsImages => "ads-images",
            Bucket::Trainer(_) => "trainer",
        }
    }

    /// Parses a bucket segment from a route; trainer buckets use `trainer-{id}`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "avatars" => Some(Bucket::Avatars),
            "ads-images" => Some(Bucket::AdsImages),
            other => other
                .strip_prefix("trainer-")
                .filter(|id| !id.is_empty())
                .map(|id| Bucket::Trainer(id.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredObject {
    pub bucket: String,
    pub path: String,
    pub public_url: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_round_trip_through_routes() {
        for bucket in [Bucket::Avatars, Bucket::AdsImages, Bucket::Trainer("abc-123".into())] {
            assert_eq!(Bucket::parse(&bucket.name()), Some(bucket));
        }
        assert_eq!(Bucket::parse("trainer-"), None);
        assert_eq!(Bucket::parse("secrets"), None);
    }
}
