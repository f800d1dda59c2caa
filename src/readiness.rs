use crate::error::ServiceError;
use crate::logring::LogStream;
use crate::task::{EndpointCapture, ReadinessConfig, ReadinessPattern, StreamSelector};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Pattern compilation
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CompiledPattern {
    name: String,
    regex: Regex,
    stream: StreamSelector,
    endpoints: Vec<EndpointCapture>,
    matched: bool,
}

impl CompiledPattern {
    fn watches(&self, stream: LogStream) -> bool {
        match self.stream {
            StreamSelector::Any => true,
            StreamSelector::Stdout => stream == LogStream::Stdout,
            StreamSelector::Stderr => stream == LogStream::Stderr,
        }
    }
}

fn build_regex(pattern: &ReadinessPattern) -> Result<Regex, ServiceError> {
    let mut builder = RegexBuilder::new(&pattern.regex);
    if let Some(ref flags) = pattern.flags {
        for flag in flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                'U' => builder.swap_greed(true),
                other => {
                    return Err(ServiceError::Validation(format!(
                        "unknown regex flag '{other}' in pattern '{}'",
                        pattern.regex
                    )));
                }
            };
        }
    }
    builder.build().map_err(|source| ServiceError::Pattern {
        pattern: pattern.regex.clone(),
        source,
    })
}

// ---------------------------------------------------------------------------
// ReadinessTracker
// ---------------------------------------------------------------------------

/// Matches service output against the task's readiness patterns.
///
/// Every not-yet-matched pattern is tested against each line in configured
/// order, in a single pass, so simultaneous matches on one line all fire and
/// their endpoints are recorded in pattern order. A pattern only inspects
/// lines from the stream it was configured against.
#[derive(Debug)]
pub struct ReadinessTracker {
    patterns: Vec<CompiledPattern>,
    captures: HashMap<String, Vec<String>>,
    endpoints: HashMap<String, String>,
}

impl ReadinessTracker {
    /// Compiles the configured patterns. Fails before anything is spawned if
    /// a regex is invalid or an endpoint references a capture group the
    /// regex does not have.
    pub fn new(config: Option<&ReadinessConfig>) -> Result<Self, ServiceError> {
        let mut patterns = Vec::new();
        if let Some(config) = config {
            for (index, pattern) in config.patterns.iter().enumerate() {
                let regex = build_regex(pattern)?;
                for endpoint in &pattern.endpoints {
                    let group = endpoint.endpoint_capture_group;
                    if group == 0 || group >= regex.captures_len() {
                        return Err(ServiceError::Validation(format!(
                            "endpoint '{}' references capture group {group}, but pattern '{}' has {} group(s)",
                            endpoint.endpoint_name,
                            pattern.regex,
                            regex.captures_len() - 1
                        )));
                    }
                }
                patterns.push(CompiledPattern {
                    name: pattern
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("pattern-{index}")),
                    regex,
                    stream: pattern.stream,
                    endpoints: pattern.endpoints.clone(),
                    matched: false,
                });
            }
        }
        Ok(Self {
            patterns,
            captures: HashMap::new(),
            endpoints: HashMap::new(),
        })
    }

    /// True once every configured pattern has matched at least once.
    /// Trivially true when no patterns are configured.
    pub fn is_complete(&self) -> bool {
        self.patterns.iter().all(|p| p.matched)
    }

    /// Feeds one output line. Returns `true` if this line completed the
    /// readiness protocol.
    pub fn observe(&mut self, stream: LogStream, line: &str) -> bool {
        if self.is_complete() {
            return false;
        }
        for pattern in &mut self.patterns {
            if pattern.matched || !pattern.watches(stream) {
                continue;
            }
            let Some(caps) = pattern.regex.captures(line) else {
                continue;
            };
            pattern.matched = true;
            let groups: Vec<String> = caps
                .iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            for endpoint in &pattern.endpoints {
                if let Some(value) = caps.get(endpoint.endpoint_capture_group) {
                    let url = format!("{}{}", endpoint.endpoint_default_host_url, value.as_str());
                    self.endpoints.insert(endpoint.endpoint_name.clone(), url);
                }
            }
            self.captures.insert(pattern.name.clone(), groups);
        }
        self.is_complete()
    }

    pub fn captures(&self) -> &HashMap<String, Vec<String>> {
        &self.captures
    }

    pub fn endpoints(&self) -> &HashMap<String, String> {
        &self.endpoints
    }

    /// Names of patterns that have not matched yet.
    pub fn unmatched(&self) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|p| !p.matched)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Clears all match state for a relaunch of the same service.
    pub fn reset(&mut self) {
        for pattern in &mut self.patterns {
            pattern.matched = false;
        }
        self.captures.clear();
        self.endpoints.clear();
    }
}
