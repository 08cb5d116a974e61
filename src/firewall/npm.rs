//! npm interceptor: tarball coordinate extraction, the
//! `vnd.npm.install-v1` Accept-header widening that unlocks full package
//! metadata, and minimum-package-age enforcement on that metadata.

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use moka::future::Cache;
use rama::{
    error::{ErrorContext as _, OpaqueError},
    http::{
        Body, HeaderValue, Request, Response,
        body::util::BodyExt as _,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED},
        headers::{Accept, HeaderMapExt as _},
    },
    telemetry::tracing,
};
use serde_json::json;

use super::coordinate::{Ecosystem, PackageCoordinate, PackageVersion};

/// True for npm tarball download URLs: `/<pkg>/-/<pkg>-<version>.tgz`
/// (scoped packages: `/@scope/pkg/-/pkg-<version>.tgz`).
pub fn is_tarball_download(path: &str) -> bool {
    path.ends_with(".tgz") && path.contains("/-/")
}

/// Extracts the bare package name from an npm metadata GET path (e.g.
/// `/left-pad` or `/@babel/core`), for filtering the metadata response that
/// comes back for it. `None` for anything that isn't a plain metadata path
/// (tarball downloads, dist-tag lookups, etc).
pub fn metadata_package_name(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains("/-/") {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

/// Parses the package coordinate out of a tarball download path. Returns
/// `None` for paths that don't fit the expected `<name>/-/<name>-<version>.tgz`
/// shape, including malformed version suffixes.
pub fn parse_tarball_coordinate(path: &str) -> Option<PackageCoordinate> {
    let path = path.trim_start_matches('/');
    let (package_name, file_name) = path.split_once("/-/")?;

    let filename_prefix = if package_name.starts_with('@')
        && let Some((_, name)) = package_name.rsplit_once('/')
    {
        // Scoped packages are named `@scope/package`; the tarball file name
        // prefix only carries the unscoped part.
        name
    } else {
        package_name
    };

    let file_name_without_ext = file_name.strip_suffix(".tgz")?;
    let version = file_name_without_ext
        .strip_prefix(filename_prefix)?
        .strip_prefix('-')?;

    Some(PackageCoordinate::new(
        Ecosystem::Npm,
        package_name.trim().to_ascii_lowercase(),
        PackageVersion::parse(version),
    ))
}

/// Rewrites `Accept: application/vnd.npm.install-v1+json` to plain
/// `application/json` so the registry returns the full metadata document
/// (which carries a `time` map of version -> publish timestamp) instead of
/// the abbreviated install metadata, which doesn't. A no-op for any other
/// `Accept` header.
pub fn widen_accept_header(req: &mut Request) {
    let Some(accept_is_npm_install) = req.headers().typed_get().map(|accept: Accept| {
        accept
            .0
            .iter()
            .any(|mime| mime.value.subtype() == "vnd.npm.install-v1")
    }) else {
        return;
    };

    if !accept_is_npm_install {
        return;
    }

    if let Ok(replacement) = HeaderValue::from_str("application/json") {
        tracing::debug!("widened npm install Accept header to application/json");
        req.headers_mut().insert("accept", replacement);
    }
}

/// Minimum-package-age enforcement: strips versions published more recently
/// than the configured minimum age out of npm metadata responses (unless the
/// package is exempted), and blocks outright any tarball download for a
/// version known (from a prior filtered metadata response) to still be too
/// young.
pub struct MinPackageAge {
    min_age: Duration,
    exclusions: HashSet<String>,
    recently_filtered: Cache<String, ()>,
}

impl MinPackageAge {
    pub fn new(min_age: Duration, exclusions: &[String]) -> Self {
        Self {
            min_age,
            exclusions: exclusions.iter().map(|s| s.to_ascii_lowercase()).collect(),
            recently_filtered: Cache::builder()
                .max_capacity(50_000)
                .time_to_live(min_age)
                .build(),
        }
    }

    pub fn is_excluded(&self, package_name: &str) -> bool {
        self.exclusions.contains(&package_name.to_ascii_lowercase())
    }

    /// Whether `coordinate` is known to still be too young to install,
    /// because a metadata response filtered it out within the configured
    /// minimum age. A version never seen via a metadata response fails open
    /// (allowed): tarball requests carry no publish timestamp of their own,
    /// so there is nothing to enforce against without a prior metadata hit.
    pub fn is_too_young(&self, coordinate: &PackageCoordinate) -> bool {
        !self.is_excluded(&coordinate.name)
            && self
                .recently_filtered
                .contains_key(&format!("{}@{}", coordinate.name, coordinate.version))
    }

    /// Filters a registry metadata response in place, dropping versions
    /// younger than the minimum age (unless the package is excluded) and
    /// fixing up `dist-tags.latest` if it pointed to a dropped version.
    pub async fn filter_metadata_response(
        &self,
        package_name: &str,
        resp: Response,
    ) -> Result<Response, OpaqueError> {
        if self.is_excluded(package_name) {
            return Ok(resp);
        }

        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        if !is_json {
            return Ok(resp);
        }

        let cutoff = SystemTime::now() - self.min_age;
        let (mut parts, body) = resp.into_parts();
        let bytes = body
            .collect()
            .await
            .context("collect npm metadata response body")?
            .to_bytes();

        let mut doc: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(err) => {
                tracing::debug!("npm metadata response is not valid JSON, passing through: {err}");
                return Ok(Response::from_parts(parts, Body::from(bytes)));
            }
        };

        let removed = versions_younger_than(&doc, cutoff);
        if removed.is_empty() {
            return Ok(Response::from_parts(parts, Body::from(bytes)));
        }

        for version in &removed {
            self.recently_filtered
                .insert(format!("{package_name}@{version}"), ())
                .await;
            remove_version(&mut doc, version);
        }
        fix_up_latest_tag(&mut doc, &removed);

        let new_bytes = serde_json::to_vec(&doc).context("serialize filtered npm metadata")?;
        parts.headers.remove(CONTENT_LENGTH);
        parts.headers.remove(ETAG);
        parts.headers.remove(LAST_MODIFIED);
        parts
            .headers
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        Ok(Response::from_parts(parts, Body::from(new_bytes)))
    }
}

impl std::fmt::Debug for MinPackageAge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinPackageAge")
            .field("min_age", &self.min_age)
            .field("exclusions", &self.exclusions)
            .finish()
    }
}

fn versions_younger_than(doc: &serde_json::Value, cutoff: SystemTime) -> Vec<String> {
    let Some(time_obj) = doc.get("time").and_then(|t| t.as_object()) else {
        return Vec::new();
    };

    time_obj
        .iter()
        .filter(|(key, _)| *key != "created" && *key != "modified")
        .filter_map(|(key, value)| {
            let timestamp = value.as_str()?;
            match humantime::parse_rfc3339(timestamp) {
                Ok(published_at) => (published_at > cutoff).then(|| key.clone()),
                Err(err) => {
                    tracing::debug!("failed to parse npm package timestamp '{timestamp}': {err}");
                    None
                }
            }
        })
        .collect()
}

fn remove_version(doc: &mut serde_json::Value, version: &str) {
    if let Some(time_obj) = doc.get_mut("time").and_then(|t| t.as_object_mut()) {
        time_obj.remove(version);
    }
    if let Some(versions_obj) = doc.get_mut("versions").and_then(|t| t.as_object_mut()) {
        versions_obj.remove(version);
    }
}

fn fix_up_latest_tag(doc: &mut serde_json::Value, removed: &[String]) {
    let Some(current_latest) = doc
        .get("dist-tags")
        .and_then(|t| t.as_object())
        .and_then(|tags| tags.get("latest"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
    else {
        return;
    };

    if !removed.iter().any(|v| v == &current_latest) {
        return;
    }

    let new_latest = doc.get("time").and_then(|t| t.as_object()).and_then(|time| {
        time.iter()
            .filter(|(version, _)| version.starts_with(|c: char| c.is_ascii_digit()))
            .filter_map(|(version, value)| {
                let ts = humantime::parse_rfc3339(value.as_str()?).ok()?;
                Some((ts, version.clone()))
            })
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, version)| version)
    });

    let Some(dist_tags) = doc.get_mut("dist-tags").and_then(|t| t.as_object_mut()) else {
        return;
    };
    dist_tags.remove("latest");
    if let Some(version) = new_latest {
        dist_tags.insert("latest".to_owned(), json!(version));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_tarball_download() {
        assert!(is_tarball_download("/left-pad/-/left-pad-1.3.0.tgz"));
        assert!(is_tarball_download(
            "/@babel/core/-/core-7.20.0.tgz"
        ));
        assert!(!is_tarball_download("/left-pad"));
        assert!(!is_tarball_download("/left-pad/-/left-pad.json"));
    }

    #[test]
    fn test_parse_tarball_coordinate_unscoped() {
        let coord = parse_tarball_coordinate("/left-pad/-/left-pad-1.3.0.tgz").unwrap();
        assert_eq!(coord.name, "left-pad");
        assert_eq!(coord.version.to_string(), "1.3.0");
    }

    #[test]
    fn test_parse_tarball_coordinate_scoped() {
        let coord = parse_tarball_coordinate("/@babel/core/-/core-7.20.0.tgz").unwrap();
        assert_eq!(coord.name, "@babel/core");
        assert_eq!(coord.version.to_string(), "7.20.0");
    }

    #[test]
    fn test_parse_tarball_coordinate_rejects_non_tarball() {
        assert!(parse_tarball_coordinate("/left-pad").is_none());
    }

    #[test]
    fn test_metadata_package_name() {
        assert_eq!(metadata_package_name("/left-pad"), Some("left-pad".to_owned()));
        assert_eq!(metadata_package_name("/@babel/core"), Some("@babel/core".to_owned()));
        assert_eq!(metadata_package_name("/left-pad/-/left-pad-1.3.0.tgz"), None);
        assert_eq!(metadata_package_name("/"), None);
    }

    #[test]
    fn test_widen_accept_header_rewrites_npm_install_mime() {
        let mut req = Request::builder()
            .uri("/left-pad")
            .header("accept", "application/vnd.npm.install-v1+json")
            .body(Body::empty())
            .unwrap();
        widen_accept_header(&mut req);
        assert_eq!(req.headers().get("accept").unwrap(), "application/json");
    }

    #[test]
    fn test_widen_accept_header_leaves_other_headers_alone() {
        let mut req = Request::builder()
            .uri("/left-pad")
            .header("accept", "application/json")
            .body(Body::empty())
            .unwrap();
        widen_accept_header(&mut req);
        assert_eq!(req.headers().get("accept").unwrap(), "application/json");
    }

    fn metadata_doc(latest: &str, versions: &[(&str, &str)]) -> serde_json::Value {
        let mut time = serde_json::Map::new();
        for (version, ts) in versions {
            time.insert((*version).to_owned(), json!(ts));
        }
        json!({
            "dist-tags": { "latest": latest },
            "versions": versions.iter().map(|(v, _)| ((*v).to_owned(), json!({}))).collect::<serde_json::Map<_, _>>(),
            "time": time,
        })
    }

    #[tokio::test]
    async fn test_filter_metadata_response_removes_young_versions() {
        let min_age = MinPackageAge::new(Duration::from_secs(60 * 60 * 24), &[]);
        let old_ts = humantime::format_rfc3339(SystemTime::now() - Duration::from_secs(60 * 60 * 24 * 30));
        let new_ts = humantime::format_rfc3339(SystemTime::now());
        let doc = metadata_doc(
            "2.0.0",
            &[("1.0.0", &old_ts.to_string()), ("2.0.0", &new_ts.to_string())],
        );
        let resp = Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&doc).unwrap()))
            .unwrap();

        let filtered = min_age
            .filter_metadata_response("demo-pkg", resp)
            .await
            .unwrap();
        let body: serde_json::Value = rama::http::BodyExtractExt::try_into_json(filtered)
            .await
            .unwrap();
        assert!(body.get("versions").unwrap().get("2.0.0").is_none());
        assert!(body.get("versions").unwrap().get("1.0.0").is_some());
        assert_eq!(body["dist-tags"]["latest"], "1.0.0");
        assert!(min_age.is_too_young(&PackageCoordinate::new(
            Ecosystem::Npm,
            "demo-pkg",
            PackageVersion::parse("2.0.0")
        )));
    }

    #[tokio::test]
    async fn test_filter_metadata_response_respects_exclusions() {
        let min_age = MinPackageAge::new(
            Duration::from_secs(60 * 60 * 24),
            &["demo-pkg".to_owned()],
        );
        let new_ts = humantime::format_rfc3339(SystemTime::now());
        let doc = metadata_doc("1.0.0", &[("1.0.0", &new_ts.to_string())]);
        let resp = Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&doc).unwrap()))
            .unwrap();

        let filtered = min_age
            .filter_metadata_response("demo-pkg", resp)
            .await
            .unwrap();
        let body: serde_json::Value = rama::http::BodyExtractExt::try_into_json(filtered)
            .await
            .unwrap();
        assert!(body.get("versions").unwrap().get("1.0.0").is_some());
    }
}
