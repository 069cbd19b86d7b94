use std::cmp::Ordering;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;

struct PatternDef {
    regex: Regex,
    confidence: f64,
    kind: &'static str,
    unit: Option<&'static str>,
}

fn def(pattern: &str, confidence: f64, kind: &'static str) -> PatternDef {
    PatternDef {
        regex: Regex::new(pattern).unwrap(),
        confidence,
        kind,
        unit: None,
    }
}

fn def_unit(pattern: &str, confidence: f64, kind: &'static str, unit: &'static str) -> PatternDef {
    PatternDef {
        unit: Some(unit),
        ..def(pattern, confidence, kind)
    }
}

static ERROR_PATTERNS: LazyLock<Vec<PatternDef>> = LazyLock::new(|| {
    vec![
        def(r"(?i)^Error:\s*(.+)$", 0.95, "generic_error"),
        def(r"(?i)^(.+)Error:\s*(.+)$", 0.9, "typed_error"),
        def(r"(?i)^Failed:\s*(.+)$", 0.9, "failure"),
        def(r"(?i)^FAIL\s*(.*)$", 0.85, "test_failure"),
        def(r"(?i)^✗\s*(.+)$", 0.8, "failed_check"),
        def(r"(?i)^Exception:\s*(.+)$", 0.9, "exception"),
        def(r"(?i)^\s*at\s+(.+?)\s*\((.+?):(\d+):(\d+)\)", 0.95, "stack_trace"),
        def(r"(?i)^\s*at\s+(.+?)$", 0.7, "stack_frame"),
        def(r"(?i)^npm ERR!\s*(.+)$", 0.9, "npm_error"),
        def(r"(?i)^fatal:\s*(.+)$", 0.95, "fatal_error"),
    ]
});

static SUCCESS_PATTERNS: LazyLock<Vec<PatternDef>> = LazyLock::new(|| {
    vec![
        def(r"(?i)^Success:\s*(.+)$", 0.9, "generic_success"),
        def(r"(?i)^PASS\s*(.*)$", 0.85, "test_pass"),
        def(r"(?i)^✓\s*(.+)$", 0.8, "check_passed"),
        def(r"(?i)^OK\s*(.*)$", 0.75, "ok_status"),
        def(r"(?i)^Completed:\s*(.+)$", 0.8, "completion"),
        def(r"(?i)^Done\s*(.*)$", 0.7, "done_status"),
        def(r"(?i)^\s*(\d+)\s+passing", 0.9, "test_summary_pass"),
        def(r"(?i)^Build successful", 0.95, "build_success"),
    ]
});

static METRIC_PATTERNS: LazyLock<Vec<PatternDef>> = LazyLock::new(|| {
    vec![
        def_unit(r"(?i)(\d+(?:\.\d+)?)\s*(ms|milliseconds?)", 0.9, "time_metric", "ms"),
        def_unit(r"(?i)(\d+(?:\.\d+)?)\s*(s|seconds?)\b", 0.85, "time_metric", "s"),
        def(r"(?i)(\d+(?:\.\d+)?)\s*(KB|MB|GB)", 0.9, "size_metric"),
        def_unit(r"(\d+(?:\.\d+)?)\s*%", 0.85, "percentage_metric", "%"),
        def(r"(\d+)/(\d+)", 0.8, "ratio_metric"),
        def(r"(?i)(\d+(?:\.\d+)?)\s*(fps|qps|rps)", 0.85, "rate_metric"),
        def_unit(r"(?i)Coverage:\s*(\d+(?:\.\d+)?)\s*%", 0.95, "coverage_metric", "%"),
    ]
});

static PATH_PATTERNS: LazyLock<Vec<PatternDef>> = LazyLock::new(|| {
    vec![
        def(r"(?:^|\s)(/(?:[^/\s]+/)*[^/\s]*)", 0.8, "unix_path"),
        def(r"(?:^|\s)([A-Za-z]:\\(?:[^\\/\s]+[\\/])*[^\\/\s]*)", 0.8, "windows_path"),
        def(r"(?:^|\s)(\./(?:[^/\s]+/)*[^/\s]*)", 0.75, "relative_path"),
        def(r"(?:^|\s)(\.\./(?:[^/\s]+/)*[^/\s]*)", 0.75, "parent_relative_path"),
        def(
            r"(?i)https?://(?:[-\w.])+(?::[0-9]+)?(?:/(?:[\w/_.])*)?(?:\?[;&%\w=]*)?",
            0.95,
            "url",
        ),
        def(r"(?:^|\s)(~/(?:[^/\s]+/)*[^/\s]*)", 0.8, "home_relative_path"),
    ]
});

static COMMAND_PATTERNS: LazyLock<Vec<PatternDef>> = LazyLock::new(|| {
    vec![
        def(r"^\$\s*(.+)$", 0.9, "shell_command"),
        def(r"^>\s*(.+)$", 0.8, "prompt_command"),
        def(r"(?i)^npm\s+(install|start|test|build|run)\s*(.*)$", 0.95, "npm_command"),
        def(r"(?i)^git\s+(\w+)\s*(.*)$", 0.95, "git_command"),
        def(r"(?i)^docker\s+(\w+)\s*(.*)$", 0.9, "docker_command"),
        def(r"(?i)^node\s+(.*)$", 0.85, "node_command"),
        def(r"(?i)^python\s+(.*)$", 0.85, "python_command"),
    ]
});

static ANSI_CODES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[mGKH]").unwrap());

/// A single recognized item in the output.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub kind: &'static str,
    pub content: String,
    /// Captured groups, in pattern order.
    pub captures: Vec<String>,
    pub confidence: f64,
    /// 1-based line number.
    pub line: usize,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub errors: Vec<Finding>,
    pub successes: Vec<Finding>,
    pub metrics: Vec<Finding>,
    pub paths: Vec<Finding>,
    pub commands: Vec<Finding>,
    /// Overall confidence in the extraction, 0.1..=1.0.
    pub confidence: f64,
    pub total_lines: usize,
    pub original_size: usize,
    pub cleaned_size: usize,
    pub processing_time: Duration,
}

/// Pattern-based extraction of errors, successes, metrics, paths, and
/// commands from captured output. Language-agnostic where possible; the
/// patterns cover the common unix, npm, git, and test-runner vocabularies.
pub struct SemanticExtractor {
    strip_ansi: bool,
}

impl SemanticExtractor {
    pub fn new() -> Self {
        Self { strip_ansi: true }
    }

    pub fn with_strip_ansi(strip_ansi: bool) -> Self {
        Self { strip_ansi }
    }

    pub fn extract(&self, output: &str) -> Extraction {
        let started = Instant::now();
        let cleaned: String = if self.strip_ansi {
            ANSI_CODES.replace_all(output, "").into_owned()
        } else {
            output.to_string()
        };
        let lines: Vec<&str> = cleaned.split('\n').collect();

        let mut extraction = Extraction {
            errors: scan(&lines, &ERROR_PATTERNS),
            successes: scan(&lines, &SUCCESS_PATTERNS),
            metrics: scan(&lines, &METRIC_PATTERNS),
            paths: scan(&lines, &PATH_PATTERNS),
            commands: scan(&lines, &COMMAND_PATTERNS),
            confidence: 0.0,
            total_lines: lines.len(),
            original_size: output.len(),
            cleaned_size: cleaned.len(),
            processing_time: Duration::ZERO,
        };
        extraction.confidence = overall_confidence(&extraction);
        extraction.processing_time = started.elapsed();
        extraction
    }
}

impl Default for SemanticExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn scan(lines: &[&str], patterns: &[PatternDef]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        for pattern in patterns {
            for caps in pattern.regex.captures_iter(line) {
                let content = caps
                    .get(0)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default();
                let captures = caps
                    .iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                findings.push(Finding {
                    kind: pattern.kind,
                    content,
                    captures,
                    confidence: pattern.confidence,
                    line: index + 1,
                    context: line.trim().to_string(),
                    unit: pattern.unit,
                });
            }
        }
    }
    dedup_and_sort(findings)
}

/// Keep the first occurrence per (kind, content) and order by confidence,
/// highest first. The sort is stable, so equal-confidence findings stay in
/// document order.
fn dedup_and_sort(mut findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen = std::collections::HashSet::new();
    findings.retain(|f| seen.insert((f.kind, f.content.clone())));
    findings.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    findings
}

fn overall_confidence(extraction: &Extraction) -> f64 {
    let categories = [
        &extraction.errors,
        &extraction.successes,
        &extraction.metrics,
        &extraction.paths,
        &extraction.commands,
    ];

    let total_items: usize = categories.iter().map(|c| c.len()).sum();
    if total_items == 0 {
        return 0.1;
    }

    let total_confidence: f64 = categories
        .iter()
        .flat_map(|c| c.iter())
        .map(|f| f.confidence)
        .sum();
    let diversity_bonus = categories.iter().filter(|c| !c.is_empty()).count() as f64 * 0.05;

    (total_confidence / total_items as f64 + diversity_bonus).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_errors_with_line_numbers() {
        let out = SemanticExtractor::new().extract("building...\nError: module not found\ndone");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].kind, "generic_error");
        assert_eq!(out.errors[0].captures[0], "module not found");
        assert_eq!(out.errors[0].line, 2);
    }

    #[test]
    fn extracts_typed_errors_and_stack_frames() {
        let text = "TypeError: x is not a function\n    at doWork (src/app.js:10:5)";
        let out = SemanticExtractor::new().extract(text);
        assert!(out.errors.iter().any(|e| e.kind == "typed_error"));
        let trace = out.errors.iter().find(|e| e.kind == "stack_trace").unwrap();
        assert_eq!(trace.captures[1], "src/app.js");
        assert_eq!(trace.captures[2], "10");
    }

    #[test]
    fn extracts_test_summaries() {
        let out = SemanticExtractor::new().extract("  42 passing\nPASS src/lib.test.js");
        assert!(out.successes.iter().any(|s| s.kind == "test_summary_pass"));
        assert!(out.successes.iter().any(|s| s.kind == "test_pass"));
    }

    #[test]
    fn extracts_metrics_with_units() {
        let out = SemanticExtractor::new().extract("compiled in 1250ms, bundle 2.4MB, 87% cached");
        let time = out.metrics.iter().find(|m| m.kind == "time_metric").unwrap();
        assert_eq!(time.unit, Some("ms"));
        assert_eq!(time.captures[0], "1250");
        assert!(out.metrics.iter().any(|m| m.kind == "size_metric"));
        assert!(out.metrics.iter().any(|m| m.kind == "percentage_metric"));
    }

    #[test]
    fn extracts_paths_and_urls() {
        let out = SemanticExtractor::new()
            .extract("wrote /tmp/out/bundle.js\nserved at http://localhost:3000/app");
        assert!(out.paths.iter().any(|p| p.kind == "unix_path"));
        let url = out.paths.iter().find(|p| p.kind == "url").unwrap();
        assert_eq!(url.content, "http://localhost:3000/app");
    }

    #[test]
    fn strips_ansi_codes_before_matching() {
        let out = SemanticExtractor::new().extract("\x1b[31mError: boom\x1b[0m");
        assert_eq!(out.errors[0].captures[0], "boom");
        assert!(out.cleaned_size < out.original_size);
    }

    #[test]
    fn deduplicates_repeated_findings() {
        let out = SemanticExtractor::new().extract("Error: boom\nError: boom\nError: boom");
        assert_eq!(
            out.errors.iter().filter(|e| e.kind == "generic_error").count(),
            1
        );
    }

    #[test]
    fn findings_sorted_by_confidence() {
        let out = SemanticExtractor::new().extract("fatal: bad object\n✗ check failed");
        assert!(out.errors.len() >= 2);
        assert!(out.errors[0].confidence >= out.errors[1].confidence);
        assert_eq!(out.errors[0].kind, "fatal_error");
    }

    #[test]
    fn empty_output_has_floor_confidence() {
        let out = SemanticExtractor::new().extract("");
        assert!(out.errors.is_empty());
        assert_eq!(out.confidence, 0.1);
    }

    #[test]
    fn diversity_raises_overall_confidence() {
        let narrow = SemanticExtractor::new().extract("Done");
        let broad = SemanticExtractor::new()
            .extract("$ npm run build\nError: boom\nDone in 300ms\nwrote /tmp/x.js");
        assert!(broad.confidence > narrow.confidence);
        assert!(broad.confidence <= 1.0);
    }
}
