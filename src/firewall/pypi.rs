//! pip/PyPI interceptor: coordinate extraction from wheel, sdist and simple-index
//! URLs. Metadata requests carry no version and are never blocked — blocking them
//! would break dependency resolution for legitimate packages that merely depend on
//! a malicious one; only the actual package file download is refused.

use super::coordinate::{Ecosystem, PackageCoordinate, PackageVersion};

const SDIST_SUFFIXES: &[&str] = &[".tar.gz", ".zip", ".tar.bz2", ".tar.xz"];

/// Extracts the package coordinate implied by a PyPI request path, or `None`
/// if the path isn't a shape this interceptor recognizes (in which case the
/// request passes through unexamined).
pub fn extract_coordinate(path: &str) -> Option<PackageCoordinate> {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(percent_decode)
        .collect();

    // JSON metadata endpoint: /pypi/<name>/json
    if segments.len() == 3 && segments[0] == "pypi" && segments[2] == "json" {
        return Some(PackageCoordinate::new(
            Ecosystem::Pip,
            normalize_package_name(&segments[1]),
            PackageVersion::None,
        ));
    }

    // Simple package listing: /simple/<name>/
    if segments.len() >= 2 && segments[0] == "simple" {
        return Some(PackageCoordinate::new(
            Ecosystem::Pip,
            normalize_package_name(&segments[1]),
            PackageVersion::None,
        ));
    }

    // Package file download, e.g. .../foo-1.0.0-py3-none-any.whl or
    // .../bar-2.3.4.tar.gz
    let filename = segments.last()?;
    parse_wheel_filename(filename).or_else(|| parse_sdist_filename(filename))
}

pub fn is_metadata_request(coordinate: &PackageCoordinate) -> bool {
    coordinate.version.is_none()
}

fn percent_decode(input: &str) -> String {
    percent_encoding::percent_decode_str(input)
        .decode_utf8_lossy()
        .to_string()
}

/// Lowercases and replaces underscores with hyphens, matching PyPI's own
/// package-name normalization (PEP 503).
fn normalize_package_name(raw: &str) -> String {
    raw.to_lowercase().replace('_', "-")
}

fn parse_wheel_filename(filename: &str) -> Option<PackageCoordinate> {
    let trimmed = filename
        .strip_suffix(".whl.metadata")
        .or_else(|| filename.strip_suffix(".whl"))?;

    let (dist, rest) = trimmed.split_once('-')?;
    let mut rest_parts = rest.splitn(2, '-');
    let version = rest_parts.next()?;
    if version.eq_ignore_ascii_case("latest") || dist.is_empty() || version.is_empty() {
        return None;
    }

    Some(PackageCoordinate::new(
        Ecosystem::Pip,
        normalize_package_name(dist),
        PackageVersion::parse(version),
    ))
}

fn parse_sdist_filename(filename: &str) -> Option<PackageCoordinate> {
    let (base, matched) = SDIST_SUFFIXES
        .iter()
        .find_map(|suffix| {
            filename
                .strip_suffix(&format!("{suffix}.metadata"))
                .or_else(|| filename.strip_suffix(*suffix))
                .map(|base| (base, true))
        })
        .unwrap_or((filename, false));

    if !matched {
        return None;
    }

    let last_dash = base.rfind('-')?;
    if last_dash == 0 || last_dash >= base.len() - 1 {
        return None;
    }

    let dist = &base[..last_dash];
    let version = &base[last_dash + 1..];
    if version.eq_ignore_ascii_case("latest") || dist.is_empty() || version.is_empty() {
        return None;
    }

    Some(PackageCoordinate::new(
        Ecosystem::Pip,
        normalize_package_name(dist),
        PackageVersion::parse(version),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wheel_filename() {
        let cases = [
            ("requests-2.31.0-py3-none-any.whl", Some(("requests", "2.31.0"))),
            ("foo_bar-1.0.0-py2.py3-none-any.whl", Some(("foo-bar", "1.0.0"))),
            (
                "my_package_name-2.0.0-py3-none-any.whl",
                Some(("my-package-name", "2.0.0")),
            ),
            ("pkg-latest-py3-none-any.whl", None),
            ("Django-4.2.0-py3-none-any.whl.metadata", Some(("django", "4.2.0"))),
            (
                "zope.interface-6.0-cp311-cp311-macosx_10_9_x86_64.whl",
                Some(("zope.interface", "6.0")),
            ),
            ("boto3-1.28.85-py3-none-any.whl", Some(("boto3", "1.28.85"))),
            ("notawheelfile.tar.gz", None),
            ("package--py3-none-any.whl", None),
        ];

        for (input, expected) in cases {
            let result = parse_wheel_filename(input);
            match expected {
                Some((name, version)) => {
                    let coord = result.unwrap_or_else(|| panic!("expected Some for {input}"));
                    assert_eq!(coord.name, name, "name mismatch for {input}");
                    assert_eq!(coord.version.to_string(), version, "version mismatch for {input}");
                }
                None => assert!(result.is_none(), "expected None for {input}"),
            }
        }
    }

    #[test]
    fn test_parse_sdist_filename() {
        let cases = [
            ("requests-2.31.0.tar.gz", Some(("requests", "2.31.0"))),
            ("foo_bar-1.0.0.zip", Some(("foo-bar", "1.0.0"))),
            (
                "django-rest-framework-3.14.0.tar.gz",
                Some(("django-rest-framework", "3.14.0")),
            ),
            ("numpy-1.24.3.tar.gz.metadata", Some(("numpy", "1.24.3"))),
            ("package-1.0.0a1.tar.gz", Some(("package", "1.0.0a1"))),
            ("pkg-latest.tar.gz", None),
            ("no-extension-1.0.0", None),
            ("-1.0.0.tar.gz", None),
        ];

        for (input, expected) in cases {
            let result = parse_sdist_filename(input);
            match expected {
                Some((name, version)) => {
                    let coord = result.unwrap_or_else(|| panic!("expected Some for {input}"));
                    assert_eq!(coord.name, name, "name mismatch for {input}");
                    assert_eq!(coord.version.to_string(), version, "version mismatch for {input}");
                }
                None => assert!(result.is_none(), "expected None for {input}"),
            }
        }
    }

    #[test]
    fn test_normalize_package_name() {
        assert_eq!(normalize_package_name("Requests"), "requests");
        assert_eq!(normalize_package_name("foo_bar"), "foo-bar");
        assert_eq!(normalize_package_name("FOO_BAR_BAZ"), "foo-bar-baz");
    }

    #[test]
    fn test_extract_coordinate() {
        let cases = [
            ("/pypi/requests/json", Some(("requests", true))),
            ("/simple/django/", Some(("django", true))),
            ("/simple/my_package/", Some(("my-package", true))),
            (
                "/packages/abc/def/requests-2.31.0-py3-none-any.whl",
                Some(("requests", false)),
            ),
            (
                "/packages/source/d/django/Django-4.2.0.tar.gz",
                Some(("django", false)),
            ),
            ("/pypi/my%20package/json", Some(("my package", true))),
            ("/", None),
            ("/help/", None),
        ];

        for (path, expected) in cases {
            let result = extract_coordinate(path);
            match expected {
                Some((name, is_metadata)) => {
                    let coord = result.unwrap_or_else(|| panic!("expected Some for {path}"));
                    assert_eq!(coord.name, name, "name mismatch for {path}");
                    assert_eq!(
                        is_metadata_request(&coord),
                        is_metadata,
                        "metadata-ness mismatch for {path}"
                    );
                }
                None => assert!(result.is_none(), "expected None for {path}"),
            }
        }
    }
}
