//! Production Code Enforcement
//!
//! Library and binary sources must propagate errors instead of panicking and
//! must not silence dead code warnings. Everything from a file's first
//! `#[cfg(test)]` onward is test code and exempt, as are mock modules.

use std::fs;
use std::path::{Path, PathBuf};

/// Patterns banned from production code, with the reason reported.
const BANNED: &[(&str, &str)] = &[
    (".unwrap()", "propagate the error with `?` instead of unwrapping"),
    (".expect(", "propagate the error with `?` instead of expecting"),
    ("allow(dead_code", "remove or use dead code instead of allowing it"),
];

/// Source roots checked, relative to the workspace root.
const SOURCE_ROOTS: &[&str] = &["restream-core/src", "restream-cli/src"];

#[derive(Debug)]
struct Violation {
    file_path: String,
    line_number: usize,
    context: String,
    reason: &'static str,
}

struct ProductionCodeChecker {
    violations: Vec<Violation>,
    files_checked: usize,
}

impl ProductionCodeChecker {
    fn new() -> Self {
        Self {
            violations: Vec::new(),
            files_checked: 0,
        }
    }

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".."))
    }

    fn find_rust_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::find_rust_files(&path, files)?;
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                files.push(path);
            }
        }
        Ok(())
    }

    fn is_mock_file(path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| name.to_string_lossy().contains("mock"))
    }

    /// Checks source text, stopping at the first test module.
    fn check_source(&mut self, file_path: &str, content: &str) {
        self.files_checked += 1;

        for (index, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("#[cfg(test)]") {
                break;
            }
            if trimmed.starts_with("//") {
                continue;
            }

            for (pattern, reason) in BANNED {
                if trimmed.contains(pattern) {
                    self.violations.push(Violation {
                        file_path: file_path.to_string(),
                        line_number: index + 1,
                        context: trimmed.to_string(),
                        reason: *reason,
                    });
                }
            }
        }
    }

    fn check_workspace(&mut self) -> std::io::Result<()> {
        let root = Self::workspace_root();
        let mut files = Vec::new();
        for source_root in SOURCE_ROOTS {
            Self::find_rust_files(&root.join(source_root), &mut files)?;
        }

        for file in files.iter().filter(|file| !Self::is_mock_file(file)) {
            let content = fs::read_to_string(file)?;
            self.check_source(&file.to_string_lossy(), &content);
        }
        Ok(())
    }

    fn report_violations(&self) -> bool {
        if self.violations.is_empty() {
            println!(
                "Production code enforcement: {} files checked, no violations found",
                self.files_checked
            );
            return true;
        }

        for violation in &self.violations {
            println!("{}:{}", violation.file_path, violation.line_number);
            println!("  {}", violation.context);
            println!("  -> {}", violation.reason);
        }
        println!(
            "Found {} violation(s) in {} file(s) checked",
            self.violations.len(),
            self.files_checked
        );
        false
    }
}

#[test]
fn test_detection_stops_at_test_module() {
    let mut checker = ProductionCodeChecker::new();
    let source = r#"
fn parse(raw: &str) -> u32 {
    raw.parse().unwrap()
}

#[allow(dead_code)]
fn unused() {}

// a comment mentioning .unwrap() is fine

#[cfg(test)]
mod tests {
    fn helper() {
        Some(1).unwrap();
    }
}
"#;

    checker.check_source("sample.rs", source);

    let lines: Vec<_> = checker.violations.iter().map(|v| v.line_number).collect();
    assert_eq!(lines, [3, 6]);
}

#[test]
fn test_mock_files_are_exempt() {
    assert!(ProductionCodeChecker::is_mock_file(Path::new(
        "restream-core/src/stream/test_mocks.rs"
    )));
    assert!(!ProductionCodeChecker::is_mock_file(Path::new(
        "restream-core/src/stream/manager.rs"
    )));
}

#[test]
fn production_code_enforcement() {
    let mut checker = ProductionCodeChecker::new();
    checker
        .check_workspace()
        .expect("Failed to scan workspace sources");

    assert!(
        checker.report_violations(),
        "Panicking shortcuts or dead code allowances found in production code - see output above"
    );
}
