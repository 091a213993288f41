//! Ping, catalog and tag listing

use crate::error::Result;
use crate::registry::{Client, Repository};
use serde::Deserialize;

#[derive(Deserialize)]
struct CatalogPage {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct TagsPage {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl Client {
    /// `GET /v2/`, through the modifier chain
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/v2/", self.url());
        self.http().execute(self.http().get(&url)).await?;
        Ok(())
    }

    /// Every repository in the registry, following `Link` pagination
    pub async fn catalog(&self) -> Result<Vec<String>> {
        let url = format!("{}/v2/_catalog?n=1000", self.url());
        self.http()
            .paginate(&url, |body| {
                let page: CatalogPage = serde_json::from_slice(body)?;
                Ok(page.repositories.unwrap_or_default())
            })
            .await
    }
}

impl Repository {
    pub async fn list_tags(&self) -> Result<Vec<String>> {
        self.http
            .paginate(&self.url("tags/list"), |body| {
                let page: TagsPage = serde_json::from_slice(body)?;
                Ok(page.tags.unwrap_or_default())
            })
            .await
    }
}
