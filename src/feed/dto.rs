use serde::Deserialize;

/// Body of `GET /feed?category=<c>`.
///
/// Every field is optional on the wire. A missing or `null` `articles` array
/// reads as an empty page.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedResponse {
    pub category: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub articles: Vec<RawArticle>,
}

/// One article exactly as the remote endpoint sent it.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawArticle {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<String>,
    pub url: Option<String>,
    pub url_to_image: Option<String>,
    pub source_name: Option<String>,
    /// NewsAPI-style nested source, used when `sourceName` is absent
    pub source: Option<SourceDto>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceDto {
    pub id: Option<String>,
    pub name: Option<String>,
}

impl RawArticle {
    /// The flat `sourceName` if present, otherwise `source.name`.
    pub fn source_name(&self) -> Option<&str> {
        self.source_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.source.as_ref().and_then(|s| s.name.as_deref()))
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<RawArticle>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<RawArticle>>::deserialize(deserializer)?.unwrap_or_default())
}
