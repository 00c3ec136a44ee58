//! Route → permission requirement matching.
//!
//! Rules form an explicitly ordered table: declaration order is priority and
//! the first structural match is authoritative. A later rule that can never
//! be reached because an earlier rule already covers it is a configuration
//! hazard and fails table construction. Unmapped paths resolve to
//! [`RouteMatch::NoRule`], which callers must treat as deny.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::GateError;
use crate::models::{Permission, RequireMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl FromStr for Method {
    type Err = GateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            other => Err(GateError::configuration(format!(
                "unknown HTTP method: {other}"
            ))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        };
        f.write_str(name)
    }
}

/// One entry of the declarative route table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Path expression, matched from the start of the path (`re.match`
    /// semantics; a missing `^` anchor is added at compile time).
    pub pattern: String,
    /// `None` matches every method.
    pub method: Option<Method>,
    pub required: Vec<Permission>,
    pub mode: RequireMode,
    pub public: bool,
}

impl RouteRule {
    pub fn new(
        pattern: impl Into<String>,
        method: Option<Method>,
        required: Vec<Permission>,
        mode: RequireMode,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            method,
            required,
            mode,
            public: false,
        }
    }

    /// A route that short-circuits to allow without touching the resolver.
    pub fn public(pattern: impl Into<String>, method: Option<Method>) -> Self {
        Self {
            pattern: pattern.into(),
            method,
            required: Vec::new(),
            mode: RequireMode::Any,
            public: true,
        }
    }
}

/// Outcome of matching a request path against the table.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteMatch<'a> {
    Public,
    Requirement {
        pattern: &'a str,
        required: &'a [Permission],
        mode: RequireMode,
    },
    NoRule,
}

struct CompiledRule {
    rule: RouteRule,
    regex: Regex,
}

pub struct RouteTable {
    rules: Vec<CompiledRule>,
}

impl RouteTable {
    /// Compile and validate the table. Any invalid pattern, a non-public
    /// rule with an empty requirement set, or a rule shadowed by an earlier
    /// one is fatal; a permissive fallback here would be a silent privilege
    /// gap.
    pub fn new(rules: Vec<RouteRule>) -> Result<Self, GateError> {
        let mut compiled: Vec<CompiledRule> = Vec::with_capacity(rules.len());

        for rule in rules {
            if !rule.public && rule.required.is_empty() {
                return Err(GateError::configuration(format!(
                    "route rule '{}' requires no permissions but is not public",
                    rule.pattern
                )));
            }

            let anchored = if rule.pattern.starts_with('^') {
                rule.pattern.clone()
            } else {
                format!("^(?:{})", rule.pattern)
            };
            let regex = Regex::new(&anchored).map_err(|err| {
                GateError::configuration(format!(
                    "invalid route pattern '{}': {err}",
                    rule.pattern
                ))
            })?;

            for earlier in &compiled {
                if !methods_overlap(earlier.rule.method, rule.method) {
                    continue;
                }
                if earlier.rule.pattern == rule.pattern {
                    return Err(GateError::configuration(format!(
                        "duplicate route pattern '{}' ({})",
                        rule.pattern,
                        method_label(rule.method),
                    )));
                }
                if let Some(path) = literal_path(&rule.pattern) {
                    if earlier.regex.is_match(&path) {
                        return Err(GateError::configuration(format!(
                            "route pattern '{}' is shadowed by earlier pattern '{}'",
                            rule.pattern, earlier.rule.pattern,
                        )));
                    }
                }
            }

            compiled.push(CompiledRule { rule, regex });
        }

        Ok(Self { rules: compiled })
    }

    /// First rule whose pattern and method match. Declaration order wins.
    pub fn match_route(&self, path: &str, method: Method) -> RouteMatch<'_> {
        for entry in &self.rules {
            if let Some(required) = entry.rule.method {
                if required != method {
                    continue;
                }
            }
            if !entry.regex.is_match(path) {
                continue;
            }
            if entry.rule.public {
                return RouteMatch::Public;
            }
            return RouteMatch::Requirement {
                pattern: &entry.rule.pattern,
                required: &entry.rule.required,
                mode: entry.rule.mode,
            };
        }
        RouteMatch::NoRule
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn methods_overlap(a: Option<Method>, b: Option<Method>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

fn method_label(method: Option<Method>) -> String {
    method.map_or_else(|| "any method".to_string(), |m| m.to_string())
}

/// If the pattern is a plain path with no regex metacharacters (anchors
/// aside), return it as a concrete path for shadow checking. Patterns with
/// real metacharacters are skipped; overlap between two arbitrary regexes
/// is not decidable here.
fn literal_path(pattern: &str) -> Option<String> {
    let stripped = pattern.trim_start_matches('^').trim_end_matches('$');
    if stripped
        .chars()
        .any(|c| ".*+?()[]{}|\\".contains(c))
    {
        return None;
    }
    Some(stripped.to_string())
}
