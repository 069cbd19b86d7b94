use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error("path must be a non-empty string")]
    EmptyPath,
    #[error("unsupported shell dialect: {0}")]
    UnknownDialect(String),
}

/// A shell/command-interpreter quoting convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Bash,
    Zsh,
    Sh,
    Fish,
    Cmd,
    Powershell,
}

impl Dialect {
    pub const ALL: [Dialect; 6] = [
        Dialect::Bash,
        Dialect::Zsh,
        Dialect::Sh,
        Dialect::Fish,
        Dialect::Cmd,
        Dialect::Powershell,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Bash => "bash",
            Dialect::Zsh => "zsh",
            Dialect::Sh => "sh",
            Dialect::Fish => "fish",
            Dialect::Cmd => "cmd",
            Dialect::Powershell => "powershell",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = QuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bash" => Ok(Dialect::Bash),
            "zsh" => Ok(Dialect::Zsh),
            "sh" => Ok(Dialect::Sh),
            "fish" => Ok(Dialect::Fish),
            "cmd" => Ok(Dialect::Cmd),
            "powershell" | "pwsh" => Ok(Dialect::Powershell),
            other => Err(QuoteError::UnknownDialect(other.to_string())),
        }
    }
}

/// Render `path` as a single literal token for the given dialect.
///
/// Operates on characters, never bytes, so multi-byte sequences, combining
/// marks, and RTL text pass through intact.
pub fn quote(path: &str, dialect: Dialect) -> Result<String, QuoteError> {
    if path.is_empty() {
        return Err(QuoteError::EmptyPath);
    }

    Ok(match dialect {
        Dialect::Bash | Dialect::Zsh | Dialect::Sh => quote_posix(path),
        Dialect::Fish => {
            // Single quotes; only the quote character itself needs escaping.
            format!("'{}'", path.replace('\'', "\\'"))
        }
        Dialect::Cmd => quote_cmd(path),
        Dialect::Powershell => format!("'{}'", path.replace('\'', "''")),
    })
}

/// Double-quote convention for the POSIX family. Backslash is escaped first
/// so the escapes added for the other metacharacters are never re-escaped.
fn quote_posix(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 2);
    out.push('"');
    for ch in path.chars() {
        match ch {
            '\\' | '"' | '`' | '$' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

fn quote_cmd(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 2);
    out.push('"');
    for ch in path.chars() {
        match ch {
            '"' => out.push_str("\"\""),
            '&' | '<' | '>' | '|' | '^' | '%' => {
                out.push('^');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Inverse of `quote_posix`, used to check the round-trip property.
    fn unquote_posix(quoted: &str) -> String {
        let inner = quoted
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap();
        let mut out = String::new();
        let mut chars = inner.chars();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(ch);
            }
        }
        out
    }

    fn unquote_single(quoted: &str, escape: &str) -> String {
        quoted
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .unwrap()
            .replace(escape, "'")
    }

    const TRICKY_PATHS: &[&str] = &[
        "/tmp/with space/file.log",
        "/tmp/quo\"te.log",
        "/tmp/back`tick$dollar.log",
        "/tmp/bang!.log",
        "/tmp/双语/输出.log",
        "/tmp/emoji-🎉.log",
        "/tmp/combining-é́.log",
        "/tmp/it's.log",
    ];

    #[test]
    fn posix_round_trip() {
        for path in TRICKY_PATHS {
            for dialect in [Dialect::Bash, Dialect::Zsh, Dialect::Sh] {
                let quoted = quote(path, dialect).unwrap();
                assert_eq!(unquote_posix(&quoted), *path, "dialect {dialect}");
            }
        }
    }

    #[test]
    fn fish_round_trip() {
        for path in TRICKY_PATHS {
            let quoted = quote(path, Dialect::Fish).unwrap();
            assert_eq!(unquote_single(&quoted, "\\'"), *path);
        }
    }

    #[test]
    fn powershell_round_trip() {
        for path in TRICKY_PATHS {
            let quoted = quote(path, Dialect::Powershell).unwrap();
            assert_eq!(unquote_single(&quoted, "''"), *path);
        }
    }

    #[test]
    fn cmd_escapes_metacharacters() {
        let quoted = quote(r"C:\temp\a&b|c.log", Dialect::Cmd).unwrap();
        assert_eq!(quoted, "\"C:\\temp\\a^&b^|c.log\"");
    }

    #[test]
    fn cmd_doubles_embedded_quotes() {
        let quoted = quote(r#"C:\te"mp\x.log"#, Dialect::Cmd).unwrap();
        assert_eq!(quoted, "\"C:\\te\"\"mp\\x.log\"");
    }

    #[test]
    fn posix_escapes_dollar_and_backtick() {
        let quoted = quote("/tmp/$HOME/`id`.log", Dialect::Bash).unwrap();
        assert_eq!(quoted, "\"/tmp/\\$HOME/\\`id\\`.log\"");
    }

    #[test]
    fn empty_path_rejected() {
        assert_eq!(quote("", Dialect::Bash), Err(QuoteError::EmptyPath));
    }

    #[test]
    fn dialect_parsing() {
        assert_eq!("bash".parse::<Dialect>().unwrap(), Dialect::Bash);
        assert_eq!("PWSH".parse::<Dialect>().unwrap(), Dialect::Powershell);
        assert!(matches!(
            "ksh".parse::<Dialect>(),
            Err(QuoteError::UnknownDialect(_))
        ));
    }
}
