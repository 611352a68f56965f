/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! CLI utilities for terminal output formatting and colors.

use crossterm::tty::IsTty;
use lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString};
use std::io::stdout;

/// Configuration for color output
#[derive(Debug, Clone)]
pub struct ColorConfig {
    /// Whether ANSI escapes are emitted.
    pub enabled: bool,
}

impl ColorConfig {
    /// Create a new `ColorConfig`, auto-detecting TTY unless nocolor is true
    #[must_use]
    pub fn new(nocolor: bool) -> Self {
        Self {
            enabled: !nocolor && stdout().is_tty(),
        }
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    /// ANSI escape code for red (errors)
    #[must_use]
    pub fn red(&self, s: &str) -> String {
        self.paint("31", s)
    }

    /// ANSI escape code for yellow (warnings)
    #[must_use]
    pub fn yellow(&self, s: &str) -> String {
        self.paint("33", s)
    }

    /// ANSI escape code for blue (information)
    #[must_use]
    pub fn blue(&self, s: &str) -> String {
        self.paint("34", s)
    }

    /// ANSI escape code for cyan (hints, file names)
    #[must_use]
    pub fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    /// ANSI escape code for dim text
    #[must_use]
    pub fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    /// ANSI escape code for bold text
    #[must_use]
    pub fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }
}

/// Lowercase label for a diagnostic severity.
#[must_use]
pub fn severity_label(severity: Option<DiagnosticSeverity>) -> &'static str {
    match severity {
        Some(DiagnosticSeverity::ERROR) => "error",
        Some(DiagnosticSeverity::WARNING) => "warning",
        Some(DiagnosticSeverity::INFORMATION) => "info",
        Some(DiagnosticSeverity::HINT) => "hint",
        _ => "unknown",
    }
}

/// Formats one diagnostic as `path:line:col: [severity] source(code): message`.
///
/// Lines and columns are 1-based.
#[must_use]
pub fn format_diagnostic(path: &str, diagnostic: &Diagnostic, colors: &ColorConfig) -> String {
    let label = severity_label(diagnostic.severity);
    let severity = match diagnostic.severity {
        Some(DiagnosticSeverity::ERROR) => colors.red(label),
        Some(DiagnosticSeverity::WARNING) => colors.yellow(label),
        Some(DiagnosticSeverity::INFORMATION) => colors.blue(label),
        _ => colors.dim(label),
    };

    let line = diagnostic.range.start.line + 1;
    let col = diagnostic.range.start.character + 1;
    let source = diagnostic.source.as_deref().unwrap_or("");
    let code = diagnostic
        .code
        .as_ref()
        .map(|c| match c {
            NumberOrString::Number(n) => n.to_string(),
            NumberOrString::String(s) => s.clone(),
        })
        .unwrap_or_default();

    let location = colors.cyan(&format!("{path}:{line}:{col}"));
    if code.is_empty() {
        format!("{location}: [{severity}] {source}: {}", diagnostic.message)
    } else {
        format!(
            "{location}: [{severity}] {source}({code}): {}",
            diagnostic.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Position, Range};

    fn diagnostic(severity: Option<DiagnosticSeverity>, code: Option<NumberOrString>) -> Diagnostic {
        Diagnostic {
            range: Range::new(Position::new(2, 4), Position::new(2, 9)),
            severity,
            code,
            source: Some("rome".to_string()),
            message: "Unused variable".to_string(),
            ..Diagnostic::default()
        }
    }

    #[test]
    fn test_color_config_disabled() {
        let config = ColorConfig::new(true);
        assert!(!config.enabled);
        assert_eq!(config.red("test"), "test");
        assert_eq!(config.yellow("test"), "test");
        assert_eq!(config.cyan("test"), "test");
        assert_eq!(config.bold("test"), "test");
    }

    #[test]
    fn test_color_config_enabled() {
        let config = ColorConfig { enabled: true };
        assert_eq!(config.red("x"), "\x1b[31mx\x1b[0m");
        assert_eq!(config.dim("x"), "\x1b[2mx\x1b[0m");
    }

    #[test]
    fn test_format_diagnostic_without_code() {
        let colors = ColorConfig { enabled: false };
        let d = diagnostic(Some(DiagnosticSeverity::WARNING), None);
        assert_eq!(
            format_diagnostic("src/index.js", &d, &colors),
            "src/index.js:3:5: [warning] rome: Unused variable"
        );
    }

    #[test]
    fn test_format_diagnostic_with_code() {
        let colors = ColorConfig { enabled: false };
        let d = diagnostic(
            Some(DiagnosticSeverity::ERROR),
            Some(NumberOrString::String("lint/noUnusedVariables".to_string())),
        );
        assert_eq!(
            format_diagnostic("a.ts", &d, &colors),
            "a.ts:3:5: [error] rome(lint/noUnusedVariables): Unused variable"
        );
    }

    #[test]
    fn test_severity_label_unknown() {
        assert_eq!(severity_label(None), "unknown");
        assert_eq!(severity_label(Some(DiagnosticSeverity::HINT)), "hint");
    }
}
