//! Resource URL formatting for the cluster API.
//!
//! A [`UrlFormatter`] captures a namespace, a resource kind and parsed query
//! options, and renders variant URLs on demand (with or without the
//! resource segment, the query string, or a resource name). URLs use the
//! synthetic `kubernetes:///` scheme, which the fetch client rewrites to the
//! live cluster base URL.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// Synthetic scheme for in-cluster resources.
pub const CLUSTER_SCHEME: &str = "kubernetes:///";

/// The `encodeURIComponent` set: everything but `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode one path or query component.
pub fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, URI_COMPONENT).to_string()
}

/// Kind metadata needed to place a resource in the API tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindDescriptor {
    /// e.g. `Pod`, `Deployment`, `Namespace`.
    pub kind: String,
    /// e.g. `v1`, `apps/v1`.
    pub api_version: String,
    #[serde(default)]
    pub is_cluster_scoped: bool,
}

impl KindDescriptor {
    pub fn new(kind: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            api_version: api_version.into(),
            is_cluster_scoped: false,
        }
    }

    pub fn cluster_scoped(mut self) -> Self {
        self.is_cluster_scoped = true;
        self
    }
}

/// Parsed query options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    /// Each selector becomes its own `labelSelector=` term.
    #[serde(default)]
    pub label_selectors: Vec<String>,
    /// Comma-joined into a single `fieldSelector=` term.
    #[serde(default)]
    pub field_selectors: Vec<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub all_namespaces: bool,
}

/// Renders resource URLs for one namespace, kind and query.
///
/// Pure: the same arguments always produce the same URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFormatter {
    namespace: String,
    kind: KindDescriptor,
    query: QueryOptions,
}

impl UrlFormatter {
    pub fn new(namespace: impl Into<String>, kind: KindDescriptor, query: QueryOptions) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            query,
        }
    }

    /// Lowercase kind, pluralized by appending `s` unless it already ends
    /// in one.
    pub fn resource(&self) -> String {
        let lower = self.kind.kind.to_lowercase();
        if lower.ends_with('s') {
            lower
        } else {
            format!("{lower}s")
        }
    }

    fn api_segment(&self) -> String {
        if self.kind.api_version == "v1" {
            "api/v1".to_string()
        } else {
            let version = self
                .kind
                .api_version
                .split('/')
                .map(encode_component)
                .collect::<Vec<_>>()
                .join("/");
            format!("apis/{version}")
        }
    }

    fn namespaced(&self) -> bool {
        !(self.query.all_namespaces || self.kind.kind == "Namespace" || self.kind.is_cluster_scoped)
    }

    fn query_terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = self
            .query
            .label_selectors
            .iter()
            .map(|s| format!("labelSelector={}", encode_component(s)))
            .collect();
        if !self.query.field_selectors.is_empty() {
            terms.push(format!(
                "fieldSelector={}",
                encode_component(&self.query.field_selectors.join(","))
            ));
        }
        if let Some(limit) = self.query.limit {
            terms.push(format!("limit={limit}"));
        }
        terms
    }

    /// Render a URL.
    ///
    /// `include_kind` appends the resource segment, `include_queries` the
    /// query string (only when there is at least one term), and `name` a
    /// single resource.
    pub fn format(&self, include_kind: bool, include_queries: bool, name: Option<&str>) -> String {
        let mut url = format!("{CLUSTER_SCHEME}{}", self.api_segment());
        if self.namespaced() {
            url.push_str("/namespaces/");
            url.push_str(&encode_component(&self.namespace));
        }
        if include_kind {
            url.push('/');
            url.push_str(&encode_component(&self.resource()));
        }
        if let Some(name) = name {
            url.push('/');
            url.push_str(&encode_component(name));
        }
        if include_queries {
            let terms = self.query_terms();
            if !terms.is_empty() {
                url.push('?');
                url.push_str(&terms.join("&"));
            }
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pods(query: QueryOptions) -> UrlFormatter {
        UrlFormatter::new("default", KindDescriptor::new("Pod", "v1"), query)
    }

    #[test]
    fn test_two_label_selectors_stay_separate() {
        let f = pods(QueryOptions {
            label_selectors: vec!["a=1".into(), "b=2".into()],
            ..Default::default()
        });
        let url = f.format(true, true, None);
        assert_eq!(
            url,
            "kubernetes:///api/v1/namespaces/default/pods?labelSelector=a%3D1&labelSelector=b%3D2"
        );
        assert!(url.ends_with("?labelSelector=a%3D1&labelSelector=b%3D2"));
    }

    #[test]
    fn test_field_selectors_are_joined() {
        let f = pods(QueryOptions {
            field_selectors: vec!["status.phase=Running".into(), "spec.nodeName=n1".into()],
            limit: Some(50),
            ..Default::default()
        });
        assert_eq!(
            f.format(true, true, None),
            "kubernetes:///api/v1/namespaces/default/pods?fieldSelector=status.phase%3DRunning%2Cspec.nodeName%3Dn1&limit=50"
        );
    }

    #[test]
    fn test_queries_only_when_requested_and_present() {
        let f = pods(QueryOptions {
            limit: Some(5),
            ..Default::default()
        });
        assert!(!f.format(true, false, None).contains('?'));
        let bare = pods(QueryOptions::default());
        assert!(!bare.format(true, true, None).contains('?'));
    }

    #[test]
    fn test_group_version_and_name() {
        let f = UrlFormatter::new(
            "prod",
            KindDescriptor::new("Deployment", "apps/v1"),
            QueryOptions::default(),
        );
        assert_eq!(
            f.format(true, false, Some("web")),
            "kubernetes:///apis/apps/v1/namespaces/prod/deployments/web"
        );
        assert_eq!(
            f.format(false, false, None),
            "kubernetes:///apis/apps/v1/namespaces/prod"
        );
    }

    #[test]
    fn test_namespace_segment_omitted() {
        let all = pods(QueryOptions {
            all_namespaces: true,
            ..Default::default()
        });
        assert_eq!(all.format(true, true, None), "kubernetes:///api/v1/pods");

        let ns = UrlFormatter::new(
            "default",
            KindDescriptor::new("Namespace", "v1"),
            QueryOptions::default(),
        );
        assert_eq!(ns.format(true, false, None), "kubernetes:///api/v1/namespaces");

        let nodes = UrlFormatter::new(
            "default",
            KindDescriptor::new("Node", "v1").cluster_scoped(),
            QueryOptions::default(),
        );
        assert_eq!(nodes.format(true, false, Some("n1")), "kubernetes:///api/v1/nodes/n1");
    }

    #[test]
    fn test_components_are_encoded() {
        let f = UrlFormatter::new(
            "team a",
            KindDescriptor::new("ConfigMap", "v1"),
            QueryOptions::default(),
        );
        assert_eq!(
            f.format(true, false, Some("x/y")),
            "kubernetes:///api/v1/namespaces/team%20a/configmaps/x%2Fy"
        );
    }
}
