use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;
use tree_sitter::{Node, Parser, Tree};

/// Structural facts derived once per command. Immutable after inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuralFacts {
    pub has_top_level_pipe: bool,
    pub has_redirection: bool,
    pub has_existing_capture: bool,
    pub is_interactive: bool,
    pub is_trivial: bool,
    pub length: usize,
    /// True when the AST strategy could not parse the input and the facts
    /// came from the token scan instead.
    pub degraded: bool,
}

static INTERACTIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"npm run (dev|start|serve)").unwrap(),
        Regex::new(r"yarn (dev|start|serve)").unwrap(),
        Regex::new(r"pnpm (dev|start|serve)").unwrap(),
        Regex::new(r"--watch").unwrap(),
        Regex::new(r"(^|\s)watch(\s|$)").unwrap(),
        Regex::new(r"docker run.*-it").unwrap(),
        Regex::new(r"(^|\s)ssh ").unwrap(),
        Regex::new(r"tail -f").unwrap(),
    ]
});

static FD_DUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d*>&\s*(\d+|-)$").unwrap());

/// Commands cheap enough that capturing their output is never worth it.
const TRIVIAL_COMMANDS: [&str; 8] = ["ls", "pwd", "echo", "cat", "head", "tail", "wc", "sort"];

/// Default ceiling (in characters) under which a trivial-prefix command is
/// treated as trivial.
pub const DEFAULT_TRIVIAL_MAX_LEN: usize = 10;

/// Derives [`StructuralFacts`] from raw command text. Prefers a bash AST via
/// tree-sitter; degrades to a quote-aware token scan when the input is not
/// valid shell syntax. Never fails.
pub struct Inspector {
    parser: Parser,
    trivial_max_len: usize,
}

impl Inspector {
    pub fn new() -> Self {
        Self::with_trivial_max_len(DEFAULT_TRIVIAL_MAX_LEN)
    }

    pub fn with_trivial_max_len(trivial_max_len: usize) -> Self {
        let mut parser = Parser::new();
        let lang = tree_sitter_bash::language();
        parser.set_language(&lang).expect("load bash grammar");
        Self {
            parser,
            trivial_max_len,
        }
    }

    pub fn inspect(&mut self, command: &str) -> StructuralFacts {
        let scan = token_scan(command);
        let tree = self
            .parser
            .parse(command, None)
            .filter(|t| !t.root_node().has_error());

        let (has_top_level_pipe, has_redirection, degraded) = match &tree {
            Some(tree) => (
                has_top_level_pipeline(tree.root_node()),
                tree_has_redirection(tree, command),
                false,
            ),
            None => {
                debug!(command, "bash parse failed, using token scan");
                (scan.first_pipe.is_some(), scan.has_redirection, true)
            }
        };

        StructuralFacts {
            has_top_level_pipe,
            has_redirection,
            has_existing_capture: scan.has_tee,
            is_interactive: INTERACTIVE_PATTERNS.iter().any(|p| p.is_match(command)),
            is_trivial: self.is_trivial(command, scan.first_pipe),
            length: command.chars().count(),
            degraded,
        }
    }

    /// A command is trivial when, after dropping its piped stages, it starts
    /// with one of a small set of cheap read-only utilities and the whole
    /// command is short. Used only as a tie-break by the policy.
    fn is_trivial(&self, command: &str, first_pipe: Option<usize>) -> bool {
        if command.chars().count() >= self.trivial_max_len {
            return false;
        }
        let head = match first_pipe {
            Some(idx) => &command[..idx],
            None => command,
        };
        head.trim_start()
            .split_whitespace()
            .next()
            .is_some_and(|word| TRIVIAL_COMMANDS.contains(&word))
    }
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset of the first `|` that sits outside quotes, backticks, and
/// substitution boundaries, and is not part of `||`.
pub fn find_first_top_level_pipe(command: &str) -> Option<usize> {
    token_scan(command).first_pipe
}

struct TokenScan {
    first_pipe: Option<usize>,
    has_redirection: bool,
    has_tee: bool,
}

/// Single-pass scan that tracks quoting and nesting state. All comparisons
/// are byte-level; UTF-8 continuation bytes never match the ASCII
/// metacharacters being looked for.
fn token_scan(command: &str) -> TokenScan {
    let bytes = command.as_bytes();
    let mut scan = TokenScan {
        first_pipe: None,
        has_redirection: false,
        has_tee: false,
    };
    let mut in_single = false;
    let mut in_double = false;
    let mut in_backtick = false;
    let mut depth = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];

        if in_single {
            if b == b'\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }

        match b {
            b'\\' => {
                i += 2;
                continue;
            }
            b'\'' if !in_double => {
                in_single = true;
                i += 1;
                continue;
            }
            b'"' => {
                in_double = !in_double;
                i += 1;
                continue;
            }
            b'`' => {
                in_backtick = !in_backtick;
                i += 1;
                continue;
            }
            _ => {}
        }

        if in_double {
            // $( ) still substitutes inside double quotes, so keep the depth
            // accurate; everything else is literal.
            if b == b'$' && bytes.get(i + 1) == Some(&b'(') {
                depth += 1;
                i += 2;
                continue;
            }
            if b == b')' {
                depth = depth.saturating_sub(1);
            }
            i += 1;
            continue;
        }

        match b {
            b'$' if bytes.get(i + 1) == Some(&b'(') => {
                depth += 1;
                i += 2;
            }
            b'<' | b'>' if bytes.get(i + 1) == Some(&b'(') => {
                // process substitution boundary
                depth += 1;
                i += 2;
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            b'|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    i += 2;
                    continue;
                }
                if depth == 0 && !in_backtick && scan.first_pipe.is_none() {
                    scan.first_pipe = Some(i);
                }
                i += 1;
            }
            b'>' if bytes.get(i + 1) == Some(&b'&')
                && bytes
                    .get(i + 2)
                    .is_some_and(|c| c.is_ascii_digit() || *c == b'-') =>
            {
                // fd duplication (2>&1 and friends) does not count
                i += 3;
            }
            b'>' | b'<' => {
                scan.has_redirection = true;
                i += 1;
            }
            b't' => {
                let at_word_start = i == 0
                    || matches!(
                        bytes[i - 1],
                        b' ' | b'\t' | b'\n' | b'|' | b';' | b'&' | b'(' | b'{'
                    );
                if at_word_start && bytes[i..].starts_with(b"tee ") {
                    scan.has_tee = true;
                }
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }

    scan
}

/// True when the parse tree contains a pipeline that is a statement in its
/// own right, i.e. not nested in a substitution or subshell.
fn has_top_level_pipeline(node: Node) -> bool {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "pipeline" => return true,
            "program" | "list" | "negated_command" | "redirected_statement" => {
                if has_top_level_pipeline(child) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn tree_has_redirection(tree: &Tree, source: &str) -> bool {
    let mut stack = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        if matches!(
            node.kind(),
            "file_redirect" | "heredoc_redirect" | "herestring_redirect"
        ) {
            let text = source[node.byte_range()].trim();
            if !FD_DUP.is_match(text) {
                return true;
            }
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(command: &str) -> StructuralFacts {
        Inspector::new().inspect(command)
    }

    #[test]
    fn detects_top_level_pipe() {
        assert!(facts("npm run build 2>&1 | tail -10").has_top_level_pipe);
        assert!(facts("find . -name '*.rs' | grep -v target | wc -l").has_top_level_pipe);
        assert!(!facts("npm run build").has_top_level_pipe);
    }

    #[test]
    fn or_operator_is_not_a_pipe() {
        assert!(!facts("make build || make fallback").has_top_level_pipe);
    }

    #[test]
    fn quoted_pipe_is_not_a_pipe() {
        assert!(!facts(r#"grep "foo|bar" file.txt"#).has_top_level_pipe);
        assert!(!facts("grep 'a|b' file.txt").has_top_level_pipe);
    }

    #[test]
    fn pipe_inside_substitution_is_not_top_level() {
        assert!(!facts("echo $(ls | wc -l)").has_top_level_pipe);
        assert!(!facts("diff <(sort a.txt | uniq) b.txt").has_top_level_pipe);
    }

    #[test]
    fn detects_redirection() {
        assert!(facts("npm run build > out.log").has_redirection);
        assert!(facts("cargo test >> log.txt").has_redirection);
        assert!(facts("sort < input.txt").has_redirection);
    }

    #[test]
    fn fd_duplication_is_not_a_redirection() {
        assert!(!facts("npm run build 2>&1 | tail -5").has_redirection);
        assert!(!facts("cargo build 2>&1").has_redirection);
    }

    #[test]
    fn quoted_angle_brackets_are_not_redirections() {
        assert!(!facts(r#"echo "a > b" | grep b"#).has_redirection);
    }

    #[test]
    fn detects_existing_tee() {
        assert!(facts("npm run build | tee out.log").has_existing_capture);
        assert!(facts("cmd 2>&1 | tee /tmp/x.log | head -5").has_existing_capture);
        assert!(!facts("npm run build | head -100").has_existing_capture);
        assert!(!facts("echo 'tee time' | head").has_existing_capture);
        assert!(!facts("genmontee --all | head").has_existing_capture);
    }

    #[test]
    fn detects_interactive_commands() {
        assert!(facts("npm run dev").is_interactive);
        assert!(facts("yarn start").is_interactive);
        assert!(facts("docker run -it ubuntu bash").is_interactive);
        assert!(facts("tail -f service.log").is_interactive);
        assert!(facts("cargo watch -x test").is_interactive);
        assert!(!facts("npm run build").is_interactive);
    }

    #[test]
    fn trivial_requires_short_and_cheap() {
        assert!(facts("ls | wc").is_trivial);
        assert!(facts("pwd").is_trivial);
        // cheap prefix but too long
        assert!(!facts("ls -la /some/long/path | grep rs").is_trivial);
        // short but not in the cheap set
        assert!(!facts("make -j8").is_trivial);
    }

    #[test]
    fn malformed_input_degrades_without_failing() {
        let f = facts("echo 'unterminated | grep x");
        assert!(f.degraded);
        // the unterminated quote swallows the pipe in the token scan
        assert!(!f.has_top_level_pipe);
    }

    #[test]
    fn first_pipe_offset_is_usable_for_splitting() {
        let cmd = "npm run build 2>&1 | tail -10";
        let idx = find_first_top_level_pipe(cmd).unwrap();
        assert_eq!(&cmd[..idx].trim_end(), &"npm run build 2>&1");
        assert_eq!(cmd[idx + 1..].trim(), "tail -10");
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        assert_eq!(facts("echo 日本語").length, 8);
    }
}
