//! # Endpoints
//!
//! Maps items and list requests to server URLs.
//!
//! ```text
//! item  {base}/{type}/{id}.json?status=DRAFT&domain=acme.org
//! list  {base}/{type}/_list.json?q=...&status=PUBLISHED&sort=...&start=...&end=...&after=...
//! ```

use url::Url;

use portal_core::{ItemType, ListParams, Status};

use crate::error::{SyncError, SyncResult};

/// Resolves where an item or list lives on the server.
pub trait EndpointResolver: Send + Sync {
    fn endpoint_for(
        &self,
        item_type: &ItemType,
        id: &str,
        status: Status,
        domain: Option<&str>,
    ) -> SyncResult<Url>;

    /// `after` is the cursor of a continuation batch.
    fn list_endpoint(&self, params: &ListParams, after: Option<&str>) -> SyncResult<Url>;
}

/// REST-style endpoints under one base URL.
#[derive(Debug, Clone)]
pub struct RestEndpoints {
    base: Url,
}

impl RestEndpoints {
    pub fn new(base: &str) -> SyncResult<Self> {
        let base = Url::parse(base)?;
        if base.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(format!(
                "API base must be a hierarchical URL, got: {base}"
            )));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url_for(&self, item_type: &ItemType, file: &str) -> SyncResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .push(&item_type.slug())
            .push(file);
        Ok(url)
    }
}

impl EndpointResolver for RestEndpoints {
    fn endpoint_for(
        &self,
        item_type: &ItemType,
        id: &str,
        status: Status,
        domain: Option<&str>,
    ) -> SyncResult<Url> {
        let mut url = self.url_for(item_type, &format!("{id}.json"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("status", status.as_str());
            if let Some(domain) = domain {
                query.append_pair("domain", domain);
            }
        }
        Ok(url)
    }

    fn list_endpoint(&self, params: &ListParams, after: Option<&str>) -> SyncResult<Url> {
        let mut url = self.url_for(&params.item_type, "_list.json")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(q) = params.effective_query() {
                query.append_pair("q", &q.to_string());
            }
            query.append_pair("status", params.status.as_str());
            let optional = [
                ("sort", params.sort.as_deref()),
                ("start", params.start.as_deref()),
                ("end", params.end.as_deref()),
                ("domain", params.domain.as_deref()),
                ("after", after),
            ];
            for (name, value) in optional {
                if let Some(value) = value {
                    query.append_pair(name, value);
                }
            }
        }
        Ok(url)
    }
}
