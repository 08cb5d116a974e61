//! Host classification: which registry hosts get MITM'd and inspected, and
//! which ecosystem interceptor handles them. Built from the fixed,
//! well-known registry hosts plus the operator's configured custom
//! registries (checked in that order: known registries first, then custom).

use rama::net::address::{Domain, DomainTrie};

use crate::config::Config;

use super::coordinate::Ecosystem;

const NPM_REGISTRY_DOMAINS: &[&str] = &[
    "registry.npmjs.org",
    "registry.npmjs.com",
    "registry.yarnpkg.com",
];

const PIP_REGISTRY_DOMAINS: &[&str] = &["pypi.org", "files.pythonhosted.org", "pypi.python.org"];

#[derive(Debug)]
pub struct RegistryClassifier {
    npm: DomainTrie<()>,
    pip: DomainTrie<()>,
}

impl RegistryClassifier {
    pub fn new(config: &Config) -> Self {
        Self {
            npm: build_trie(NPM_REGISTRY_DOMAINS, &config.npm_custom_registries),
            pip: build_trie(PIP_REGISTRY_DOMAINS, &config.pip_custom_registries),
        }
    }

    /// Returns the ecosystem `domain` belongs to, if any. Checked in a fixed
    /// order (npm before pip) so a host that were (incorrectly) configured
    /// into both lists resolves deterministically.
    pub fn classify(&self, domain: &Domain) -> Option<Ecosystem> {
        if self.npm.is_match_parent(domain) {
            Some(Ecosystem::Npm)
        } else if self.pip.is_match_parent(domain) {
            Some(Ecosystem::Pip)
        } else {
            None
        }
    }
}

fn build_trie(known: &[&str], custom: &[String]) -> DomainTrie<()> {
    let mut trie = DomainTrie::new();
    for domain in known {
        trie.insert_domain(Domain::from_static(domain), ());
    }
    for domain in custom {
        if let Ok(domain) = domain.parse::<Domain>() {
            trie.insert_domain(domain, ());
        } else {
            rama::telemetry::tracing::warn!("ignoring invalid custom registry host '{domain}'");
        }
    }
    trie
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_registries() {
        let classifier = RegistryClassifier::new(&Config::default());
        assert_eq!(
            classifier.classify(&"registry.npmjs.org".parse().unwrap()),
            Some(Ecosystem::Npm)
        );
        assert_eq!(
            classifier.classify(&"files.pythonhosted.org".parse().unwrap()),
            Some(Ecosystem::Pip)
        );
        assert_eq!(
            classifier.classify(&"example.com".parse().unwrap()),
            None
        );
    }

    #[test]
    fn test_classify_custom_registry() {
        let config = Config {
            npm_custom_registries: vec!["npm.internal.example.com".to_owned()],
            ..Config::default()
        };
        let classifier = RegistryClassifier::new(&config);
        assert_eq!(
            classifier.classify(&"npm.internal.example.com".parse().unwrap()),
            Some(Ecosystem::Npm)
        );
    }
}
