use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Source directories watched for the policy scan. The read-only reference
// material and build output never count as crate sources.
const WATCHED_DIRS: [&str; 7] = [
    "tuning", "preproc", "archive", "create", "cli", "tests", "benches",
];
const SKIPPED_ROOTS: [&str; 2] = ["./target", "./examples"];

// One source policy enforced at build time.
#[derive(Clone, Copy)]
enum Rule {
    UnderscoreBinding,
    ForbiddenWord,
    DoubleStar,
    ShoutedComment,
    AllowDeadCode,
}

impl Rule {
    const ALL: [Rule; 5] = [
        Rule::UnderscoreBinding,
        Rule::ForbiddenWord,
        Rule::DoubleStar,
        Rule::ShoutedComment,
        Rule::AllowDeadCode,
    ];

    fn pattern(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => r"\b(_[a-zA-Z0-9_]+)\b",
            Rule::ForbiddenWord => concat!(
                r"(//|/\*|///).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|",
                r"MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)"
            ),
            Rule::DoubleStar => r"(//|/\*).*\*\*",
            Rule::ShoutedComment => r"(//|/\*|///).*",
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        }
    }

    // The build script spells the comment patterns out, so only the
    // binding rule applies to it.
    fn covers_build_script(self) -> bool {
        matches!(self, Rule::UnderscoreBinding)
    }

    fn headline(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => "underscore-prefixed identifiers",
            Rule::ForbiddenWord => "comments carrying edit-history words",
            Rule::DoubleStar => "'**' markers in regular comments",
            Rule::ShoutedComment => "comments written entirely in uppercase",
            Rule::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => {
                "Use the binding or delete it; underscore prefixes hide unused state."
            }
            Rule::ForbiddenWord => {
                "Describe what the code does, not how it came to be. Delete the comment."
            }
            Rule::DoubleStar => "Emphasis markers belong in doc comments only.",
            Rule::ShoutedComment => "Rewrite the comment in sentence case or delete it.",
            Rule::AllowDeadCode => "Use the item or remove it.",
        }
    }

    // Decides whether a line reported by the matcher is a genuine violation.
    fn accepts(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Rule::UnderscoreBinding => {
                let in_comment = trimmed.starts_with("//") || line.contains("/*");
                let in_string = line
                    .split('"')
                    .enumerate()
                    .any(|(idx, part)| idx % 2 == 1 && part.contains('_'));
                !in_comment && !in_string
            }
            Rule::ForbiddenWord | Rule::AllowDeadCode => true,
            Rule::DoubleStar => !trimmed.starts_with("///"),
            Rule::ShoutedComment => comment_body(line).is_some_and(|body| {
                let letters: Vec<char> = body.chars().filter(|c| c.is_alphabetic()).collect();
                !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
            }),
        }
    }
}

fn comment_body(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        return Some(rest.trim());
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(rest.trim());
    }
    let start = line.find("/*")? + 2;
    let tail = &line[start..];
    Some(match tail.find("*/") {
        Some(end) => tail[..end].trim(),
        None => tail.trim(),
    })
}

// Collects violating lines of a single file for one rule.
struct Findings {
    rule: Rule,
    file: PathBuf,
    lines: Vec<String>,
}

impl Findings {
    fn new(rule: Rule, file: &Path) -> Self {
        Self {
            rule,
            file: file.to_path_buf(),
            lines: Vec::new(),
        }
    }

    fn report(&self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let mut message = format!(
            "\nERROR: found {} {} in {}:\n",
            self.lines.len(),
            self.rule.headline(),
            self.file.display()
        );
        for line in &self.lines {
            message.push_str(&format!("   {line}\n"));
        }
        message.push_str(&format!("\n{}\n", self.rule.advice()));
        Some(message)
    }
}

impl Sink for Findings {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let number = mat.line_number().unwrap_or(0);
        let text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.accepts(text) {
            self.lines.push(format!("{number}:{text}"));
        }
        Ok(true)
    }
}

fn rust_sources(include_build_script: bool) -> Vec<PathBuf> {
    WalkDir::new(".")
        .into_iter()
        .filter_entry(|entry| !SKIPPED_ROOTS.iter().any(|root| entry.path().starts_with(root)))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "rs"))
        .filter(|entry| include_build_script || entry.file_name() != "build.rs")
        .map(|entry| entry.into_path())
        .collect()
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern())?;
    let mut searcher = Searcher::new();
    for path in rust_sources(rule.covers_build_script()) {
        if std::fs::metadata(&path).is_err() {
            continue;
        }
        let mut findings = Findings::new(rule, &path);
        searcher.search_path(&matcher, &path, &mut findings)?;
        if let Some(report) = findings.report() {
            return Err(report.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in WATCHED_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    for rule in Rule::ALL {
        if let Err(e) = scan(rule) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
