use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::inspector::StructuralFacts;

/// Minimum command length (in characters) worth capturing.
pub const DEFAULT_MIN_COMMAND_LEN: usize = 10;

/// Why the policy accepted or rejected a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    AlreadyCaptured,
    HasRedirection,
    Interactive,
    TooShort,
    Trivial,
    NoPipe,
    Piped,
    ExpensivePattern,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reason::AlreadyCaptured => "ALREADY_CAPTURED",
            Reason::HasRedirection => "HAS_REDIRECTION",
            Reason::Interactive => "INTERACTIVE",
            Reason::TooShort => "TOO_SHORT",
            Reason::Trivial => "TRIVIAL",
            Reason::NoPipe => "NO_PIPE",
            Reason::Piped => "PIPED",
            Reason::ExpensivePattern => "EXPENSIVE_PATTERN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RewritePlan {
    pub should_rewrite: bool,
    pub reason: Reason,
}

impl RewritePlan {
    fn accept(reason: Reason) -> Self {
        Self {
            should_rewrite: true,
            reason,
        }
    }

    fn reject(reason: Reason) -> Self {
        Self {
            should_rewrite: false,
            reason,
        }
    }
}

/// The legacy expensive-operation catalog. A hybrid policy variant consulted
/// these in addition to pipe presence; pipe-only is normative now and this
/// list is only used when explicitly enabled.
pub static EXPENSIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"npm run (build|test|lint|typecheck|check)").unwrap(),
        Regex::new(r"yarn (build|test|lint|typecheck|check)").unwrap(),
        Regex::new(r"pnpm (build|test|lint|typecheck|check)").unwrap(),
        Regex::new(r"tsx .+\.(ts|js)").unwrap(),
        Regex::new(r"node .+\.js").unwrap(),
        Regex::new(r"npx .+").unwrap(),
        Regex::new(r"find ").unwrap(),
        Regex::new(r"grep -r").unwrap(),
        Regex::new(r"(^|\s)rg ").unwrap(),
        Regex::new(r"(^|\s)ag ").unwrap(),
        Regex::new(r"git log").unwrap(),
        Regex::new(r"git diff.*--stat").unwrap(),
        Regex::new(r"git blame").unwrap(),
        Regex::new(r"migrate").unwrap(),
        Regex::new(r"prisma").unwrap(),
        Regex::new(r"docker (build|run)").unwrap(),
    ]
});

/// Pure decision function over structural facts and command text.
///
/// Pipe presence is the dominant signal: a user piping output into a filter
/// probably wants the unfiltered remainder available. The ordered rejects
/// come first so that a piped command that already redirects, captures, or
/// never terminates is left alone.
pub struct Policy {
    min_command_len: usize,
    catalog: Vec<Regex>,
}

impl Policy {
    pub fn new() -> Self {
        Self {
            min_command_len: DEFAULT_MIN_COMMAND_LEN,
            catalog: Vec::new(),
        }
    }

    pub fn with_min_command_len(mut self, len: usize) -> Self {
        self.min_command_len = len;
        self
    }

    /// Enables the legacy hybrid variant by injecting a predicate list the
    /// policy consults after the pipe check. Off by default.
    pub fn with_catalog(mut self, catalog: Vec<Regex>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn decide(&self, command: &str, facts: &StructuralFacts) -> RewritePlan {
        let plan = self.decide_inner(command, facts);
        debug!(command, reason = %plan.reason, activate = plan.should_rewrite, "policy decision");
        plan
    }

    fn decide_inner(&self, command: &str, facts: &StructuralFacts) -> RewritePlan {
        if facts.has_existing_capture {
            return RewritePlan::reject(Reason::AlreadyCaptured);
        }
        if facts.has_redirection {
            return RewritePlan::reject(Reason::HasRedirection);
        }
        if facts.is_interactive {
            return RewritePlan::reject(Reason::Interactive);
        }
        if facts.length < self.min_command_len {
            return RewritePlan::reject(Reason::TooShort);
        }
        if facts.has_top_level_pipe {
            if facts.is_trivial {
                return RewritePlan::reject(Reason::Trivial);
            }
            return RewritePlan::accept(Reason::Piped);
        }
        if self.catalog.iter().any(|p| p.is_match(command)) {
            return RewritePlan::accept(Reason::ExpensivePattern);
        }
        RewritePlan::reject(Reason::NoPipe)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::Inspector;

    fn decide(command: &str) -> RewritePlan {
        let facts = Inspector::new().inspect(command);
        Policy::new().decide(command, &facts)
    }

    #[test]
    fn piped_command_activates() {
        let plan = decide("npm run build 2>&1 | tail -10");
        assert!(plan.should_rewrite);
        assert_eq!(plan.reason, Reason::Piped);
    }

    #[test]
    fn no_pipe_rejects() {
        let plan = decide("npm run build");
        assert!(!plan.should_rewrite);
        assert_eq!(plan.reason, Reason::NoPipe);
    }

    #[test]
    fn existing_tee_rejects_first() {
        let plan = decide("npm run build | tee out.log");
        assert_eq!(plan.reason, Reason::AlreadyCaptured);
    }

    #[test]
    fn redirection_rejects() {
        let plan = decide("npm run build > build.log");
        assert_eq!(plan.reason, Reason::HasRedirection);
    }

    #[test]
    fn interactive_rejects_even_with_pipe() {
        let plan = decide("npm run dev | grep ready");
        assert_eq!(plan.reason, Reason::Interactive);
    }

    #[test]
    fn short_command_rejects() {
        let plan = decide("ls | wc");
        assert_eq!(plan.reason, Reason::TooShort);
    }

    #[test]
    fn catalog_is_off_by_default() {
        let plan = decide("npm run build --verbose");
        assert_eq!(plan.reason, Reason::NoPipe);
    }

    #[test]
    fn catalog_activates_when_injected() {
        let command = "npm run build --verbose";
        let facts = Inspector::new().inspect(command);
        let policy = Policy::new().with_catalog(
            EXPENSIVE_PATTERNS
                .iter()
                .map(|p| Regex::new(p.as_str()).unwrap())
                .collect(),
        );
        let plan = policy.decide(command, &facts);
        assert!(plan.should_rewrite);
        assert_eq!(plan.reason, Reason::ExpensivePattern);
    }

    #[test]
    fn decision_order_is_stable() {
        // redirection outranks the pipe accept
        let plan = decide("npm run build 2>&1 | tee /tmp/x | head > y.txt");
        assert_eq!(plan.reason, Reason::AlreadyCaptured);
    }
}
