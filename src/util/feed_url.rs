use thiserror::Error;
use url::Url;

/// Errors from validating the configured feed base URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host part.
    #[error("URL has no host")]
    MissingHost,
    /// Userinfo in the URL would leak into logs; use `api_key` instead.
    #[error("Credentials in URL not allowed")]
    EmbeddedCredentials,
}

/// Validate a feed endpoint base URL and normalize it for joining.
///
/// The result always ends in `/` and carries no query or fragment, so
/// `base.join("feed")` appends to the path instead of replacing its last
/// segment.
///
/// # Examples
///
/// ```
/// use newscache::util::validate_feed_url;
///
/// let url = validate_feed_url("https://api.example.com/v1").unwrap();
/// assert_eq!(url.as_str(), "https://api.example.com/v1/");
///
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlValidationError::EmbeddedCredentials);
    }

    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_feed_url("https://example.com").is_ok());
        assert!(validate_feed_url("http://127.0.0.1:8080").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_feed_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_feed_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_unparseable_rejected() {
        assert!(matches!(
            validate_feed_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_credentials_rejected() {
        assert!(matches!(
            validate_feed_url("https://user:pw@example.com/"),
            Err(UrlValidationError::EmbeddedCredentials)
        ));
    }

    #[test]
    fn test_trailing_slash_added() {
        let url = validate_feed_url("https://example.com/api/v2").unwrap();
        assert_eq!(url.as_str(), "https://example.com/api/v2/");
        assert_eq!(
            url.join("feed").unwrap().as_str(),
            "https://example.com/api/v2/feed"
        );
    }

    #[test]
    fn test_query_and_fragment_dropped() {
        let url = validate_feed_url("https://example.com/api?x=1#top").unwrap();
        assert_eq!(url.as_str(), "https://example.com/api/");
    }
}
