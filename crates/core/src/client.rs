use crate::traits::{QuadIndex, QuadPager};
use crate::{BoundingBox, Mosaic, Quad, QuadSearchError};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

pub const DEFAULT_BASEMAPS_URL: &str = "https://api.planet.com/basemaps/v1";
pub const DEFAULT_PAGE_SIZE: u32 = 50;

const BACKEND: &str = "basemaps api";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASEMAPS_URL.to_string(),
            api_key: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Links {
    #[serde(rename = "_next", default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuadsPage {
    #[serde(default)]
    items: Vec<Quad>,
    #[serde(rename = "_links", default)]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct MosaicsPage {
    #[serde(default)]
    mosaics: Vec<Mosaic>,
    #[serde(rename = "_links", default)]
    links: Option<Links>,
}

fn next_link(links: Option<Links>) -> Option<String> {
    links.and_then(|links| links.next)
}

/// HTTP client for the basemaps mosaic and quad endpoints.
#[derive(Clone)]
pub struct PlanetClient {
    client: Client,
    config: ClientConfig,
}

impl PlanetClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    pub fn quads_url(
        &self,
        mosaic: &Mosaic,
        bbox: &BoundingBox,
        page_size: u32,
    ) -> Result<Url, QuadSearchError> {
        let url = Url::parse_with_params(
            &self.endpoint(&format!("mosaics/{}/quads", mosaic.id)),
            &[
                ("bbox", bbox.as_query_param()),
                ("minimal", "true".to_string()),
                ("_page_size", page_size.to_string()),
            ],
        )?;
        Ok(url)
    }

    pub async fn mosaic_by_name(&self, name: &str) -> Result<Mosaic, QuadSearchError> {
        let url = Url::parse_with_params(&self.endpoint("mosaics"), &[("name__is", name)])?;
        let page: MosaicsPage = get_json(&self.client, self.config.api_key.as_deref(), url).await?;
        page.mosaics
            .into_iter()
            .next()
            .ok_or_else(|| QuadSearchError::MosaicNotFound(name.to_string()))
    }

    pub async fn mosaics_in_series(&self, series_id: &str) -> Result<Vec<Mosaic>, QuadSearchError> {
        let mut next = Some(Url::parse(
            &self.endpoint(&format!("series/{series_id}/mosaics")),
        )?);
        let mut mosaics = Vec::new();

        while let Some(url) = next.take() {
            let page: MosaicsPage =
                get_json(&self.client, self.config.api_key.as_deref(), url).await?;
            mosaics.extend(page.mosaics);
            next = next_link(page.links).map(|link| Url::parse(&link)).transpose()?;
        }

        Ok(mosaics)
    }
}

#[async_trait]
impl QuadIndex for PlanetClient {
    async fn quads_for_mosaic(
        &self,
        mosaic: &Mosaic,
        bbox: &BoundingBox,
    ) -> Result<Box<dyn QuadPager>, QuadSearchError> {
        let first = self.quads_url(mosaic, bbox, self.config.page_size)?;
        Ok(Box::new(PlanetQuadPager {
            client: self.client.clone(),
            api_key: self.config.api_key.clone(),
            next: Some(first),
        }))
    }

    async fn one_quad(&self, mosaic: &Mosaic) -> Result<Option<Quad>, QuadSearchError> {
        let url = self.quads_url(mosaic, &mosaic.bbox, 1)?;
        let page: QuadsPage = get_json(&self.client, self.config.api_key.as_deref(), url).await?;
        Ok(page.items.into_iter().next())
    }
}

pub struct PlanetQuadPager {
    client: Client,
    api_key: Option<String>,
    next: Option<Url>,
}

#[async_trait]
impl QuadPager for PlanetQuadPager {
    async fn next_page(&mut self) -> Result<Option<Vec<Quad>>, QuadSearchError> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };

        debug!(url = %url, "fetching quad page");
        let page: QuadsPage = get_json(&self.client, self.api_key.as_deref(), url).await?;
        self.advance(page).map(Some)
    }
}

impl PlanetQuadPager {
    /// Queues the page's `_next` link and yields its quads.
    fn advance(&mut self, page: QuadsPage) -> Result<Vec<Quad>, QuadSearchError> {
        self.next = next_link(page.links).map(|link| Url::parse(&link)).transpose()?;
        Ok(page.items)
    }
}

async fn get_json<T: DeserializeOwned>(
    client: &Client,
    api_key: Option<&str>,
    url: Url,
) -> Result<T, QuadSearchError> {
    let mut request = client.get(url);
    if let Some(key) = api_key {
        request = request.basic_auth(key, Some(""));
    }

    let response = check_status(request.send().await?)?;
    Ok(response.json().await?)
}

fn check_status(response: Response) -> Result<Response, QuadSearchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            QuadSearchError::Unauthorized(format!("{BACKEND} returned {status}"))
        }
        StatusCode::TOO_MANY_REQUESTS => QuadSearchError::RateLimited(BACKEND.to_string()),
        _ => QuadSearchError::BackendResponse {
            backend: BACKEND.to_string(),
            details: status.to_string(),
        },
    })
}
