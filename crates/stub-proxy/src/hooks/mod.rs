//! Fault-injection hook chain.
//!
//! Hooks are consulted in declaration order before a request reaches normal
//! dispatch. The first hook whose predicate holds claims the request and no
//! other hook is evaluated for it. A claiming hook either answers the request
//! itself (a hard failure such as a slow 500) or delays it and lets normal
//! dispatch continue (added latency in front of a real response).

mod matcher;

pub use matcher::CompiledMatch;

use crate::config::HookConfig;
use crate::proxy::RequestInfo;
use crate::stubs::{Stub, StubHead};
use bytes::Bytes;
use rand::Rng;
use std::time::Duration;
use tracing::info;

/// What a claiming hook wants done with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    /// Wait `delay`, then answer with `response`; the origin is not contacted
    Respond { response: Stub, delay: Duration },
    /// Wait `delay`, then continue as if no hook had matched
    Continue { delay: Duration },
}

/// A predicate/handler pair.
pub trait Hook: Send + Sync {
    fn id(&self) -> &str;

    /// `seq` is the 1-based request count at the time the request arrived.
    fn matches(&self, seq: u64, request: &RequestInfo) -> bool;

    fn action(&self, request: &RequestInfo) -> HookAction;
}

/// Result of running the chain for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// No hook matched
    Unclaimed,
    /// A hook answered; dispatch this response and stop
    Respond { hook_id: String, response: Stub },
    /// A hook delayed the request; continue with normal dispatch
    Continued { hook_id: String, delay: Duration },
}

/// Ordered list of hooks.
#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Box<dyn Hook>>,
}

impl HookChain {
    pub fn new(hooks: Vec<Box<dyn Hook>>) -> Self {
        Self { hooks }
    }

    pub fn from_config(configs: &[HookConfig]) -> Result<Self, anyhow::Error> {
        let hooks = configs
            .iter()
            .map(|config| ConfiguredHook::compile(config).map(|h| Box::new(h) as Box<dyn Hook>))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { hooks })
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// First hook whose predicate holds, if any.
    pub fn select(&self, seq: u64, request: &RequestInfo) -> Option<&dyn Hook> {
        self.hooks
            .iter()
            .map(|hook| hook.as_ref())
            .find(|hook| hook.matches(seq, request))
    }

    /// Evaluate the chain and carry out the claiming hook's delay.
    pub async fn run(&self, seq: u64, request: &RequestInfo) -> HookOutcome {
        let Some(hook) = self.select(seq, request) else {
            return HookOutcome::Unclaimed;
        };
        info!("Using hook '{}' for request {}", hook.id(), seq);

        match hook.action(request) {
            HookAction::Respond { response, delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                HookOutcome::Respond {
                    hook_id: hook.id().to_string(),
                    response,
                }
            }
            HookAction::Continue { delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                HookOutcome::Continued {
                    hook_id: hook.id().to_string(),
                    delay,
                }
            }
        }
    }
}

/// Hook built from a configuration entry.
pub struct ConfiguredHook {
    id: String,
    matcher: CompiledMatch,
    action: ConfiguredAction,
}

enum ConfiguredAction {
    Respond { response: Stub, delay: Duration },
    Delay { min_ms: u64, max_ms: u64 },
}

impl ConfiguredHook {
    pub fn compile(config: &HookConfig) -> Result<Self, anyhow::Error> {
        let matcher = CompiledMatch::compile(&config.match_config)?;
        let action = match (&config.action.respond, &config.action.delay) {
            (Some(respond), None) => {
                let mut head = StubHead::with_status(respond.status);
                for (name, value) in &respond.headers {
                    head.push(name, value.clone());
                }
                ConfiguredAction::Respond {
                    response: Stub {
                        body: Bytes::from(respond.body.clone()),
                        head,
                    },
                    delay: Duration::from_millis(respond.delay_ms),
                }
            }
            (None, Some(delay)) => {
                let (min_ms, max_ms) = delay.bounds();
                if min_ms > max_ms {
                    anyhow::bail!("Hook '{}': min_ms greater than max_ms", config.id);
                }
                ConfiguredAction::Delay { min_ms, max_ms }
            }
            (Some(_), Some(_)) => {
                anyhow::bail!("Hook '{}': both 'respond' and 'delay' are set", config.id)
            }
            (None, None) => anyhow::bail!("Hook '{}': no action configured", config.id),
        };
        Ok(Self {
            id: config.id.clone(),
            matcher,
            action,
        })
    }
}

impl Hook for ConfiguredHook {
    fn id(&self) -> &str {
        &self.id
    }

    fn matches(&self, seq: u64, request: &RequestInfo) -> bool {
        self.matcher.matches(seq, request)
    }

    fn action(&self, _request: &RequestInfo) -> HookAction {
        match &self.action {
            ConfiguredAction::Respond { response, delay } => HookAction::Respond {
                response: response.clone(),
                delay: *delay,
            },
            ConfiguredAction::Delay { min_ms, max_ms } => {
                let ms = if min_ms == max_ms {
                    *min_ms
                } else {
                    rand::thread_rng().gen_range(*min_ms..=*max_ms)
                };
                HookAction::Continue {
                    delay: Duration::from_millis(ms),
                }
            }
        }
    }
}
