//! reqwest clients for the follow graph and feed store services.

use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use tidings_core::{ClientError, FeedStore, FollowGraph, Post, PostId, UserId};

/// Map a non-success status to the client error taxonomy.
pub fn status_error(status: StatusCode, url: &str) -> ClientError {
    match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(url.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ClientError::Unavailable(format!("{status} from {url}"))
        }
        s if s.is_server_error() => ClientError::Unavailable(format!("{status} from {url}")),
        _ => ClientError::Rejected(format!("{status} from {url}")),
    }
}

/// JSON-over-HTTP plumbing shared by the service clients.
#[derive(Clone)]
struct JsonClient {
    client: reqwest::Client,
    base_url: Url,
}

impl JsonClient {
    fn new(client: reqwest::Client, base_url: &str) -> Result<Self, ClientError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| ClientError::Rejected(format!("invalid base url {base_url}: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(ClientError::Rejected(format!(
                "base url {base_url} cannot carry a path"
            )));
        }
        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    /// Append path segments to the base URL, escaping each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, url.as_str()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Malformed(e.to_string()))
    }
}

/// Follow graph backed by the user service.
#[derive(Clone)]
pub struct HttpFollowGraph {
    http: JsonClient,
}

impl HttpFollowGraph {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            http: JsonClient::new(client, base_url)?,
        })
    }
}

impl FollowGraph for HttpFollowGraph {
    async fn follower_count(&self, author: &UserId) -> Result<u64, ClientError> {
        let url = self.http.url(&["api", "follower", "count", author.as_str()]);
        self.http.get_json(url, &[]).await
    }

    fn followers<'a>(&'a self, author: &'a UserId) -> BoxStream<'a, Result<UserId, ClientError>> {
        let url = self.http.url(&["api", "follower", author.as_str()]);
        stream::once(async move { self.http.get_json::<Vec<UserId>>(url, &[]).await })
            .flat_map(|result| match result {
                Ok(followers) => stream::iter(followers.into_iter().map(Ok)).left_stream(),
                Err(e) => stream::iter([Err(e)]).right_stream(),
            })
            .boxed()
    }

    async fn followings(&self, reader: &UserId) -> Result<Vec<UserId>, ClientError> {
        let url = self.http.url(&["api", "following", reader.as_str()]);
        self.http.get_json(url, &[]).await
    }
}

/// Feed store backed by the feed service.
#[derive(Clone)]
pub struct HttpFeedStore {
    http: JsonClient,
}

impl HttpFeedStore {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            http: JsonClient::new(client, base_url)?,
        })
    }
}

impl FeedStore for HttpFeedStore {
    async fn get(&self, id: PostId) -> Result<Option<Post>, ClientError> {
        let id = id.to_string();
        let url = self.http.url(&["api", "feeds", id.as_str()]);
        match self.http.get_json(url, &[]).await {
            Ok(post) => Ok(Some(post)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn find_ids_between(
        &self,
        author: &UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PostId>, ClientError> {
        let url = self.http.url(&["api", "feeds", "ids"]);
        let query = [
            ("author", author.to_string()),
            ("from", from.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ("to", to.to_rfc3339_opts(SecondsFormat::Millis, true)),
        ];
        self.http.get_json(url, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidings_core::TransientError;

    #[test]
    fn test_status_mapping() {
        let url = "http://feeds/api/feeds/1";

        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, url),
            ClientError::NotFound(_)
        ));
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, url).is_transient());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, url).is_transient());
        assert!(status_error(StatusCode::REQUEST_TIMEOUT, url).is_transient());

        let rejected = status_error(StatusCode::BAD_REQUEST, url);
        assert!(matches!(rejected, ClientError::Rejected(_)));
        assert!(!rejected.is_transient());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let graph = HttpFollowGraph::new(reqwest::Client::new(), "http://users:8080/").unwrap();
        assert_eq!(
            graph.http.url(&["api", "following", "ada"]).as_str(),
            "http://users:8080/api/following/ada"
        );

        let nested = HttpFeedStore::new(reqwest::Client::new(), "http://gw/feed").unwrap();
        assert_eq!(
            nested.http.url(&["api", "feeds", "7"]).as_str(),
            "http://gw/feed/api/feeds/7"
        );
    }

    #[test]
    fn test_user_ids_are_escaped_in_paths() {
        let graph = HttpFollowGraph::new(reqwest::Client::new(), "http://users:8080").unwrap();
        let url = graph.http.url(&["api", "following", "a/b?c#d"]);

        assert_eq!(url.path(), "/api/following/a%2Fb%3Fc%23d");
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = HttpFeedStore::new(reqwest::Client::new(), "not a url");
        assert!(matches!(result, Err(ClientError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        // Port 9 (discard) on localhost is closed in test environments
        let store = HttpFeedStore::new(reqwest::Client::new(), "http://127.0.0.1:9").unwrap();
        let err = store.get(PostId(1)).await.unwrap_err();
        assert!(err.is_transient());
    }
}
