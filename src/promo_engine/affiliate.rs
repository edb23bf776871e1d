//! Affiliate link rewriting applied to candidate URLs before validation

use url::Url;

pub trait LinkRewriter: Send + Sync {
    fn rewrite(&self, product_url: &str) -> String;
}

/// Leaves the product URL untouched.
pub struct Passthrough;

impl LinkRewriter for Passthrough {
    fn rewrite(&self, product_url: &str) -> String {
        product_url.to_string()
    }
}

/// Redirect-style affiliate links: `base?<fixed params>&<target>=<product url>`.
pub struct QueryAffiliate {
    base: Url,
    params: Vec<(String, String)>,
    target_param: String,
}

impl QueryAffiliate {
    pub fn new(base: Url, params: Vec<(String, String)>, target_param: impl Into<String>) -> Self {
        Self {
            base,
            params,
            target_param: target_param.into(),
        }
    }

    /// Parses `key=value,key=value` pairs; malformed items are ignored.
    pub fn parse_params(raw: &str) -> Vec<(String, String)> {
        raw.split(',')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                let key = key.trim();
                (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

impl LinkRewriter for QueryAffiliate {
    fn rewrite(&self, product_url: &str) -> String {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in &self.params {
                query.append_pair(key, value);
            }
            query.append_pair(&self.target_param, product_url);
        }
        url.to_string()
    }
}
