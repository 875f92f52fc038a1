use crate::config::{HookMatch, PathMatch};
use crate::proxy::RequestInfo;
use hyper::Method;
use rand::Rng;
use regex::Regex;

/// Compiled form of a hook's `match` block.
pub struct CompiledMatch {
    every: Option<u64>,
    methods: Vec<Method>,
    path_matcher: PathMatcher,
    probability: Option<f64>,
}

enum PathMatcher {
    Any,
    Exact(String),
    Prefix(String),
    Regex(Regex),
    Contains(String),
    EndsWith(String),
}

impl CompiledMatch {
    pub fn compile(config: &HookMatch) -> Result<Self, anyhow::Error> {
        let methods: Vec<Method> = config
            .methods
            .iter()
            .map(|m| m.to_uppercase().parse())
            .collect::<Result<Vec<_>, _>>()?;

        let path_matcher = match &config.path {
            PathMatch::Any => PathMatcher::Any,
            PathMatch::Exact { exact } => PathMatcher::Exact(exact.clone()),
            PathMatch::Prefix { prefix } => PathMatcher::Prefix(prefix.clone()),
            PathMatch::Regex { regex } => PathMatcher::Regex(Regex::new(regex)?),
            PathMatch::Contains { contains } => PathMatcher::Contains(contains.clone()),
            PathMatch::EndsWith { ends_with } => PathMatcher::EndsWith(ends_with.clone()),
        };

        Ok(Self {
            every: config.every,
            methods,
            path_matcher,
            probability: config.probability,
        })
    }

    /// Deterministic conditions first; the probability roll happens last so
    /// that non-matching requests never consume randomness.
    pub fn matches(&self, seq: u64, request: &RequestInfo) -> bool {
        if let Some(every) = self.every {
            if every == 0 || seq % every != 0 {
                return false;
            }
        }

        if !self.methods.is_empty() && !self.methods.contains(&request.method) {
            return false;
        }

        let path = request.uri.path();
        let path_ok = match &self.path_matcher {
            PathMatcher::Any => true,
            PathMatcher::Exact(exact) => path == exact,
            PathMatcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathMatcher::Regex(regex) => regex.is_match(path),
            PathMatcher::Contains(pattern) => path.contains(pattern.as_str()),
            PathMatcher::EndsWith(suffix) => path.ends_with(suffix.as_str()),
        };
        if !path_ok {
            return false;
        }

        match self.probability {
            Some(p) => should_inject(p, &mut rand::thread_rng()),
            None => true,
        }
    }
}

fn should_inject(probability: f64, rng: &mut impl Rng) -> bool {
    rng.gen::<f64>() < probability
}
