//! Git URL resolution for third-party dependencies.
//!
//! Turns `(package name, ecosystem)` into a canonical repository URL via
//! ecosystem heuristics, validates candidates with a rate-limited HTTP
//! HEAD (following up to ten redirects), and caches outcomes - empty ones
//! included - in the dependency-alias table with a TTL.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::cache::AstCache;
use crate::error::ResolveError;
use crate::types::{CancelFlag, DependencyAlias, DependencyType};

/// Per-request deadline for HEAD validation.
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// Average validations per second, and the burst ceiling.
const RATE_PER_SEC: f64 = 10.0;
const BURST: f64 = 10.0;

/// `gopkg.in/<name>.vN` packages that do not live under a user of the
/// same name.
const GOPKG_SINGLE: [(&str, &str); 6] = [
    ("yaml", "go-yaml/yaml"),
    ("check", "go-check/check"),
    ("ini", "go-ini/ini"),
    ("tomb", "go-tomb/tomb"),
    ("fsnotify", "fsnotify/fsnotify"),
    ("natefinch/lumberjack", "natefinch/lumberjack"),
];

/// Well-known docker organisations and library images.
const DOCKER_ORGS: [(&str, &str); 3] = [
    ("bitnami", "bitnami/containers"),
    ("flanksource", ""), // per-image repos under the org
    ("grafana", "grafana"),
];

const DOCKER_LIBRARY: [(&str, &str); 8] = [
    ("nginx", "nginx/nginx"),
    ("redis", "redis/redis"),
    ("postgres", "postgres/postgres"),
    ("mysql", "mysql/mysql-server"),
    ("alpine", "alpinelinux/docker-alpine"),
    ("ubuntu", "tianon/docker-brew-ubuntu-core"),
    ("golang", "docker-library/golang"),
    ("node", "nodejs/docker-node"),
];

/// Curated helm chart sources. Values are full `owner/repo` paths.
const HELM_CHARTS: [(&str, &str); 8] = [
    ("flanksource", "flanksource/charts"),
    ("bitnami", "bitnami/charts"),
    ("prometheus", "prometheus-community/helm-charts"),
    ("kube-prometheus-stack", "prometheus-community/helm-charts"),
    ("cert-manager", "cert-manager/cert-manager"),
    ("ingress-nginx", "kubernetes/ingress-nginx"),
    ("grafana", "grafana/helm-charts"),
    ("argo-cd", "argoproj/argo-helm"),
];

/// Strip at most one scheme and one `.git` suffix, plus any trailing
/// slash. Idempotent.
pub fn normalize_git_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .or_else(|| trimmed.strip_prefix("git://"))
        .unwrap_or(trimmed);
    let without_slash = without_scheme.trim_end_matches('/');
    without_slash
        .strip_suffix(".git")
        .unwrap_or(without_slash)
        .to_string()
}

/// Heuristic candidate URL for a package, no network involved. Returns
/// an empty string when the ecosystem has no resolution story.
pub fn heuristic_url(name: &str, dep_type: DependencyType) -> String {
    match dep_type {
        DependencyType::Go | DependencyType::Stdlib => go_candidate(name),
        DependencyType::Docker => docker_candidate(name),
        DependencyType::Helm => helm_candidate(name).0,
        DependencyType::Npm | DependencyType::Pip | DependencyType::Maven => String::new(),
    }
}

fn go_candidate(name: &str) -> String {
    for host in ["github.com/", "gitlab.com/", "bitbucket.org/"] {
        if let Some(rest) = name.strip_prefix(host) {
            let repo: Vec<&str> = rest.split('/').take(2).collect();
            if repo.len() == 2 {
                return format!("https://{}{}/{}", host, repo[0], repo[1]);
            }
            return format!("https://{}{}", host, rest);
        }
    }
    if let Some(rest) = name.strip_prefix("golang.org/x/") {
        let repo = rest.split('/').next().unwrap_or(rest);
        return format!("https://github.com/golang/{repo}");
    }
    if let Some(rest) = name.strip_prefix("gopkg.in/") {
        return gopkg_candidate(rest);
    }
    String::new()
}

/// `gopkg.in/user/repo.vN` -> `github.com/user/repo`;
/// `gopkg.in/name.vN` -> curated mapping.
fn gopkg_candidate(rest: &str) -> String {
    let stripped = match rest.rfind(".v") {
        Some(pos) if rest[pos + 2..].chars().all(|c| c.is_ascii_digit()) => &rest[..pos],
        _ => rest,
    };
    if let Some((user, repo)) = stripped.split_once('/') {
        return format!("https://github.com/{user}/{repo}");
    }
    for (name, repo) in GOPKG_SINGLE {
        if stripped == name {
            return format!("https://github.com/{repo}");
        }
    }
    String::new()
}

fn docker_candidate(name: &str) -> String {
    // Strip registry prefixes and tags.
    let name = name.split(':').next().unwrap_or(name);
    let name = name
        .strip_prefix("docker.io/")
        .or_else(|| name.strip_prefix("registry.hub.docker.com/"))
        .or_else(|| name.strip_prefix("quay.io/"))
        .unwrap_or(name);
    if let Some(rest) = name.strip_prefix("ghcr.io/") {
        let repo: Vec<&str> = rest.split('/').take(2).collect();
        if repo.len() == 2 {
            return format!("https://github.com/{}/{}", repo[0], repo[1]);
        }
    }

    match name.split_once('/') {
        Some((org, image)) => {
            for (known, repo) in DOCKER_ORGS {
                if org == known {
                    return if repo.is_empty() {
                        format!("https://github.com/{org}/{image}")
                    } else {
                        format!("https://github.com/{repo}")
                    };
                }
            }
            format!("https://github.com/{org}/{image}")
        }
        None => {
            for (image, repo) in DOCKER_LIBRARY {
                if name == image {
                    return format!("https://github.com/{repo}");
                }
            }
            String::new()
        }
    }
}

/// Curated chart URL plus an optional speculative per-chart repo that is
/// preferred when it validates.
fn helm_candidate(name: &str) -> (String, Option<String>) {
    for (chart, repo) in HELM_CHARTS {
        if name == chart || name.starts_with(&format!("{chart}-")) {
            let curated = format!("https://github.com/{repo}");
            // Monorepos may have been split since the table was written.
            let speculative = if repo.ends_with("/charts") || repo.ends_with("helm-charts") {
                Some(format!("https://github.com/{}/{}", repo.split('/').next().unwrap_or(chart), name))
            } else {
                None
            };
            return (curated, speculative);
        }
    }
    (String::new(), None)
}

/// Token bucket limiting validation requests.
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new() -> Self {
        TokenBucket {
            tokens: BURST,
            last_refill: Instant::now(),
        }
    }

    /// Seconds the caller must wait before its token is available.
    fn reserve(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * RATE_PER_SEC).min(BURST);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            0.0
        } else {
            let wait = (1.0 - self.tokens) / RATE_PER_SEC;
            self.tokens -= 1.0;
            wait
        }
    }
}

/// The resolution service. Cheap to clone; clones share the rate
/// limiter and the alias cache.
#[derive(Clone)]
pub struct GitUrlResolver {
    cache: Arc<AstCache>,
    client: Option<reqwest::blocking::Client>,
    bucket: Arc<Mutex<TokenBucket>>,
    ttl: chrono::Duration,
    cancel: CancelFlag,
}

impl GitUrlResolver {
    /// Build a resolver over the given alias store. `offline` skips HEAD
    /// validation entirely, keeping heuristic candidates as-is.
    pub fn new(cache: Arc<AstCache>, ttl_hours: i64, offline: bool, cancel: CancelFlag) -> Self {
        let client = if offline {
            None
        } else {
            reqwest::blocking::Client::builder()
                .timeout(HEAD_TIMEOUT)
                .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
                .build()
                .ok()
        };
        GitUrlResolver {
            cache,
            client,
            bucket: Arc::new(Mutex::new(TokenBucket::new())),
            ttl: chrono::Duration::hours(ttl_hours.max(0)),
            cancel,
        }
    }

    /// Resolve a package to a canonical git URL, consulting and feeding
    /// the alias cache. An empty string means "no URL could be
    /// determined" and is itself cached to suppress retries within the
    /// TTL window.
    pub fn resolve_git_url(
        &self,
        name: &str,
        dep_type: DependencyType,
    ) -> Result<String, ResolveError> {
        if self.cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        if let Some(alias) = self.cache.get_dependency_alias(name, dep_type)? {
            let age = chrono::Utc::now() - alias.last_checked;
            if age <= self.ttl {
                return Ok(alias.git_url);
            }
        }

        let url = match dep_type {
            DependencyType::Helm => {
                let (curated, speculative) = helm_candidate(name);
                match speculative {
                    Some(candidate) => {
                        let (valid, final_url) = self.validate_git_url(&candidate);
                        if valid {
                            final_url
                        } else {
                            self.validated_or_candidate(&curated)
                        }
                    }
                    None => self.validated_or_candidate(&curated),
                }
            }
            other => {
                let candidate = heuristic_url(name, other);
                self.validated_or_candidate(&candidate)
            }
        };

        self.cache.store_dependency_alias(&DependencyAlias {
            package_name: name.to_string(),
            package_type: dep_type,
            git_url: url.clone(),
            last_checked: chrono::Utc::now(),
        })?;
        Ok(url)
    }

    /// Validate a candidate, keeping it verbatim on any failure so no
    /// information is lost.
    fn validated_or_candidate(&self, candidate: &str) -> String {
        if candidate.is_empty() {
            return String::new();
        }
        let (_, final_url) = self.validate_git_url(candidate);
        final_url
    }

    /// Issue a HEAD request for `candidate`, following redirects.
    ///
    /// Returns `(valid, final_url)`. On network error, cancellation or a
    /// status >= 400 the candidate itself is returned so the caller does
    /// not lose it.
    pub fn validate_git_url(&self, candidate: &str) -> (bool, String) {
        let Some(client) = &self.client else {
            return (false, candidate.to_string());
        };
        if self.cancel.is_cancelled() {
            return (false, candidate.to_string());
        }

        let wait = self
            .bucket
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .reserve();
        if wait > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(wait));
        }
        if self.cancel.is_cancelled() {
            return (false, candidate.to_string());
        }

        match client.head(candidate).send() {
            Ok(response) if response.status().is_success() => {
                (true, response.url().to_string())
            }
            Ok(response) => {
                tracing::debug!(url = candidate, status = %response.status(), "candidate rejected");
                (false, candidate.to_string())
            }
            Err(e) => {
                tracing::debug!(url = candidate, error = %e, "candidate validation failed");
                (false, candidate.to_string())
            }
        }
    }
}

/// Attach resolved git URLs to a dependency list in place, logging and
/// keeping going on individual failures.
pub fn resolve_dependency_urls(
    resolver: &GitUrlResolver,
    deps: &mut [crate::types::Dependency],
) {
    for dep in deps {
        match resolver.resolve_git_url(&dep.name, dep.dep_type) {
            Ok(url) if !url.is_empty() => dep.git_url = Some(url),
            Ok(_) => {}
            Err(ResolveError::Cancelled) => break,
            Err(e) => {
                tracing::warn!(package = dep.name, error = %e, "git url resolution failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_resolver() -> GitUrlResolver {
        let cache = Arc::new(AstCache::open_in_memory().unwrap());
        GitUrlResolver::new(cache, 24, true, CancelFlag::new())
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_git_url("https://github.com/x/y.git/");
        assert_eq!(once, "github.com/x/y");
        assert_eq!(normalize_git_url(&once), once);
        // Only one .git suffix is stripped.
        assert_eq!(normalize_git_url("github.com/x/y.git.git"), "github.com/x/y.git");
    }

    #[test]
    fn go_passthrough_hosts() {
        assert_eq!(
            heuristic_url("github.com/flanksource/commons", DependencyType::Go),
            "https://github.com/flanksource/commons"
        );
        assert_eq!(
            heuristic_url("github.com/flanksource/commons/collections", DependencyType::Go),
            "https://github.com/flanksource/commons"
        );
        assert_eq!(
            heuristic_url("gitlab.com/org/tool", DependencyType::Go),
            "https://gitlab.com/org/tool"
        );
    }

    #[test]
    fn golang_x_maps_to_github_golang() {
        assert_eq!(
            heuristic_url("golang.org/x/sync", DependencyType::Stdlib),
            "https://github.com/golang/sync"
        );
        assert_eq!(
            heuristic_url("golang.org/x/tools/cmd/stringer", DependencyType::Go),
            "https://github.com/golang/tools"
        );
    }

    #[test]
    fn gopkg_two_segment_and_curated() {
        assert_eq!(
            heuristic_url("gopkg.in/natefinch/lumberjack.v2", DependencyType::Go),
            "https://github.com/natefinch/lumberjack"
        );
        assert_eq!(
            heuristic_url("gopkg.in/yaml.v3", DependencyType::Go),
            "https://github.com/go-yaml/yaml"
        );
        assert_eq!(heuristic_url("gopkg.in/unknownpkg.v1", DependencyType::Go), "");
    }

    #[test]
    fn docker_org_and_library_mappings() {
        assert_eq!(
            heuristic_url("bitnami/postgresql", DependencyType::Docker),
            "https://github.com/bitnami/containers"
        );
        assert_eq!(
            heuristic_url("flanksource/canary-checker:v1.0", DependencyType::Docker),
            "https://github.com/flanksource/canary-checker"
        );
        assert_eq!(
            heuristic_url("docker.io/nginx", DependencyType::Docker),
            "https://github.com/nginx/nginx"
        );
        assert_eq!(heuristic_url("scratch", DependencyType::Docker), "");
    }

    #[test]
    fn npm_and_pip_have_no_heuristic() {
        assert_eq!(heuristic_url("react", DependencyType::Npm), "");
        assert_eq!(heuristic_url("requests", DependencyType::Pip), "");
    }

    #[test]
    fn resolve_uses_fresh_alias_without_validation() {
        let cache = Arc::new(AstCache::open_in_memory().unwrap());
        cache
            .store_dependency_alias(&DependencyAlias {
                package_name: "github.com/flanksource/commons".to_string(),
                package_type: DependencyType::Go,
                git_url: "https://github.com/flanksource/commons".to_string(),
                last_checked: chrono::Utc::now(),
            })
            .unwrap();
        let resolver = GitUrlResolver::new(Arc::clone(&cache), 24, true, CancelFlag::new());

        let url = resolver
            .resolve_git_url("github.com/flanksource/commons", DependencyType::Go)
            .unwrap();
        assert_eq!(url, "https://github.com/flanksource/commons");
    }

    #[test]
    fn resolve_is_idempotent_within_ttl() {
        let resolver = offline_resolver();
        let first = resolver
            .resolve_git_url("gopkg.in/yaml.v3", DependencyType::Go)
            .unwrap();
        let second = resolver
            .resolve_git_url("gopkg.in/yaml.v3", DependencyType::Go)
            .unwrap();
        assert_eq!(first, "https://github.com/go-yaml/yaml");
        assert_eq!(first, second);
    }

    #[test]
    fn expired_alias_is_recomputed_not_deleted() {
        let cache = Arc::new(AstCache::open_in_memory().unwrap());
        cache
            .store_dependency_alias(&DependencyAlias {
                package_name: "gopkg.in/yaml.v3".to_string(),
                package_type: DependencyType::Go,
                git_url: "https://example.com/stale".to_string(),
                last_checked: chrono::Utc::now() - chrono::Duration::hours(48),
            })
            .unwrap();
        let resolver = GitUrlResolver::new(Arc::clone(&cache), 24, true, CancelFlag::new());

        let url = resolver
            .resolve_git_url("gopkg.in/yaml.v3", DependencyType::Go)
            .unwrap();
        assert_eq!(url, "https://github.com/go-yaml/yaml");

        let alias = cache
            .get_dependency_alias("gopkg.in/yaml.v3", DependencyType::Go)
            .unwrap()
            .unwrap();
        assert_eq!(alias.git_url, "https://github.com/go-yaml/yaml");
    }

    #[test]
    fn empty_outcome_is_cached() {
        let cache = Arc::new(AstCache::open_in_memory().unwrap());
        let resolver = GitUrlResolver::new(Arc::clone(&cache), 24, true, CancelFlag::new());
        let url = resolver.resolve_git_url("react", DependencyType::Npm).unwrap();
        assert_eq!(url, "");

        let alias = cache
            .get_dependency_alias("react", DependencyType::Npm)
            .unwrap()
            .unwrap();
        assert!(alias.git_url.is_empty());
    }

    #[test]
    fn cancelled_resolution_propagates() {
        let cache = Arc::new(AstCache::open_in_memory().unwrap());
        let cancel = CancelFlag::new();
        cancel.cancel();
        let resolver = GitUrlResolver::new(cache, 24, true, cancel);
        assert!(matches!(
            resolver.resolve_git_url("github.com/x/y", DependencyType::Go),
            Err(ResolveError::Cancelled)
        ));
    }

    #[test]
    fn token_bucket_allows_burst_then_throttles() {
        let mut bucket = TokenBucket::new();
        for _ in 0..10 {
            assert_eq!(bucket.reserve(), 0.0);
        }
        assert!(bucket.reserve() > 0.0);
    }
}
