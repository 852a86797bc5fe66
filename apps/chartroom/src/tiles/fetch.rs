use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use url::Url;

use super::{TileAddress, TileError};

/// Source of raw, still encoded, tile bytes.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    async fn fetch(&self, address: &TileAddress) -> Result<Bytes, TileError>;
}

/// Downloads `GET {base}/tile/{tileset}/{resolution}/{col}/{row}`.
#[derive(Debug, Clone)]
pub struct HttpTileFetcher {
    client: Client,
    base: Url,
}

impl HttpTileFetcher {
    pub fn new(base: Url) -> Self {
        Self::with_client(Client::new(), base)
    }

    pub fn with_client(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    pub fn tile_url(&self, address: &TileAddress) -> Result<Url, TileError> {
        let numbers = [address.resolution, address.col, address.row].map(|n| n.to_string());
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TileError::BaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .push("tile")
            .push(&address.tileset)
            .extend(numbers.iter());
        Ok(url)
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, address: &TileAddress) -> Result<Bytes, TileError> {
        let url = self.tile_url(address)?;
        let request_failed = |err: reqwest::Error| TileError::Request {
            address: address.to_string(),
            reason: err.to_string(),
        };
        let response = self.client.get(url).send().await.map_err(request_failed)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TileError::Status {
                address: address.to_string(),
                status: status.as_u16(),
            });
        }
        response.bytes().await.map_err(request_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_url_appends_segments() {
        let fetcher = HttpTileFetcher::new(Url::parse("http://maps.local:8080/api/").unwrap());
        let url = fetcher
            .tile_url(&TileAddress::new("north sea", 300, 4, 11))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://maps.local:8080/api/tile/north%20sea/300/4/11"
        );
    }

    #[test]
    fn root_base_has_no_double_slash() {
        let fetcher = HttpTileFetcher::new(Url::parse("http://maps.local").unwrap());
        let url = fetcher.tile_url(&TileAddress::new("t", 72, 0, 0)).unwrap();
        assert_eq!(url.path(), "/tile/t/72/0/0");
    }

    #[test]
    fn opaque_base_is_rejected() {
        let fetcher = HttpTileFetcher::new(Url::parse("data:text/plain,x").unwrap());
        assert!(matches!(
            fetcher.tile_url(&TileAddress::new("t", 72, 0, 0)),
            Err(TileError::BaseUrl(_))
        ));
    }
}
