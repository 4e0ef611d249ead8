//! Markdown extraction for workflow documents.
//!
//! Workflow playbooks are prose. This module pulls out the structured parts
//! the engine needs and ignores the rest:
//!
//! - a YAML front-matter block (`name`, `version`, `tags`, `depends_on`)
//! - phase headings mentioning exactly one of RED, GREEN, REFACTOR, COMMIT
//! - checkbox bullets (`- [ ]`, `* [x]`, `+ [X]`) inside a phase
//! - gate checks, from a `### Gate` subsection or a `Gate: a, b` line
//!
//! Fenced code blocks are skipped entirely.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::error::{EngineError, EngineResult};
use super::gate::Check;
use super::phase::PhaseKind;

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*#*\s*$").unwrap());
static CHECKBOX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-*+]\s+\[([ xX])\]\s+(.+?)\s*$").unwrap());
static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-*+]\s+(?:\[[ xX]\]\s+)?(.+?)\s*$").unwrap());
static PHASE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(red|green|refactor|commit)\b").unwrap());
static GATE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bgates?\b").unwrap());
static GATE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\**gates?\s*:\s*\**\s*(.+?)\s*$").unwrap());
static CHECK_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());

/// Front-matter block of a workflow document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FrontMatter {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub depends_on: Vec<String>,
}

/// A phase as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPhase {
    pub kind: PhaseKind,
    pub line: usize,
    pub items: Vec<String>,
    pub checks: Vec<Check>,
}

/// Everything extracted from one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedWorkflow {
    pub front: Option<FrontMatter>,
    pub title: Option<String>,
    pub phases: Vec<ParsedPhase>,
}

/// Whether the content opens with a front-matter block.
pub fn has_front_matter(content: &str) -> bool {
    content.trim_start_matches('\u{feff}').lines().next().is_some_and(|l| l.trim_end() == "---")
}

/// Parse a workflow document. `path` is only used for error reporting.
pub fn parse_workflow(path: &Path, content: &str) -> EngineResult<ParsedWorkflow> {
    let content = content.trim_start_matches('\u{feff}');
    let (front, body, offset) = split_front_matter(path, content)?;

    let mut title = None;
    let mut phases: Vec<ParsedPhase> = Vec::new();
    let mut open: Option<OpenPhase> = None;
    let mut fence: Option<&str> = None;

    for (idx, raw) in body.lines().enumerate() {
        let lineno = idx + offset + 1;
        let trimmed = raw.trim();

        if let Some(marker) = fence {
            if trimmed.starts_with(marker) {
                fence = None;
            }
            continue;
        }
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            fence = Some(&trimmed[..3]);
            continue;
        }

        if let Some(cap) = HEADING.captures(trimmed) {
            let depth = cap[1].len();
            let text = cap[2].to_string();

            if depth == 1 {
                if title.is_none() {
                    title = Some(text);
                }
                if let Some(done) = open.take() {
                    phases.push(done.phase);
                }
                continue;
            }

            let kind = phase_kind_of(&text);
            let starts_phase = kind.is_some()
                && open.as_ref().map_or(true, |o| depth <= o.depth);

            if starts_phase {
                if let Some(done) = open.take() {
                    phases.push(done.phase);
                }
                if let Some(kind) = kind {
                    tracing::debug!(line = lineno, phase = %kind, "Phase heading");
                    open = Some(OpenPhase {
                        depth,
                        in_gate: false,
                        phase: ParsedPhase { kind, line: lineno, items: Vec::new(), checks: Vec::new() },
                    });
                }
                continue;
            }

            if let Some(current) = open.as_mut() {
                if depth <= current.depth {
                    if let Some(done) = open.take() {
                        phases.push(done.phase);
                    }
                } else {
                    current.in_gate = GATE_WORD.is_match(&text);
                }
            }
            continue;
        }

        let Some(current) = open.as_mut() else {
            continue;
        };

        if let Some(cap) = GATE_LINE.captures(trimmed) {
            let names: Vec<&str> =
                cap[1].split(',').map(clean_check_name).filter(|name| !name.is_empty()).collect();
            // A sentence that happens to start with "Gates:" is prose.
            if !names.is_empty() && names.iter().all(|name| CHECK_NAME.is_match(name)) {
                for name in names {
                    current.phase.checks.push(check(path, lineno, name, None)?);
                }
                continue;
            }
            tracing::debug!(line = lineno, "Gate line is not a list of check names, ignored");
        }

        if current.in_gate {
            if let Some(cap) = BULLET.captures(raw) {
                current.phase.checks.push(parse_gate_bullet(path, lineno, &cap[1])?);
            }
        } else if let Some(cap) = CHECKBOX.captures(raw) {
            current.phase.items.push(cap[2].to_string());
        }
    }

    if let Some(done) = open.take() {
        phases.push(done.phase);
    }

    validate_phases(path, &phases)?;

    Ok(ParsedWorkflow { front, title, phases })
}

struct OpenPhase {
    depth: usize,
    in_gate: bool,
    phase: ParsedPhase,
}

/// The phase a heading names, when it names exactly one.
fn phase_kind_of(text: &str) -> Option<PhaseKind> {
    let mut kinds = PHASE_WORD.find_iter(text).filter_map(|m| PhaseKind::parse(m.as_str()));
    let first = kinds.next()?;
    if kinds.any(|k| k != first) {
        return None;
    }
    Some(first)
}

fn split_front_matter<'a>(
    path: &Path,
    content: &'a str,
) -> EngineResult<(Option<FrontMatter>, &'a str, usize)> {
    if !has_front_matter(content) {
        return Ok((None, content, 0));
    }

    let mut consumed = 0;
    let mut yaml_end = None;
    for (idx, line) in content.split_inclusive('\n').enumerate() {
        if idx > 0 && matches!(line.trim_end(), "---" | "...") {
            yaml_end = Some((consumed, consumed + line.len(), idx + 1));
            break;
        }
        consumed += line.len();
    }

    let Some((yaml_stop, body_start, lines)) = yaml_end else {
        return Err(EngineError::malformed(path, "front matter is not terminated by '---'"));
    };

    let first_line_len = content.find('\n').map_or(content.len(), |i| i + 1);
    let yaml = &content[first_line_len..yaml_stop];
    let front: FrontMatter = if yaml.trim().is_empty() {
        FrontMatter::default()
    } else {
        serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::malformed(path, format!("invalid front matter: {e}")))?
    };

    Ok((Some(front), &content[body_start..], lines))
}

fn validate_phases(path: &Path, phases: &[ParsedPhase]) -> EngineResult<()> {
    if phases.is_empty() {
        return Err(EngineError::malformed(
            path,
            "no RED, GREEN, REFACTOR or COMMIT phase headings found",
        ));
    }

    for pair in phases.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.kind == prev.kind {
            return Err(EngineError::malformed(
                path,
                format!("line {}: phase {} is declared twice", next.line, next.kind),
            ));
        }
        if next.kind < prev.kind {
            return Err(EngineError::malformed(
                path,
                format!("line {}: phase {} must come before {}", next.line, next.kind, prev.kind),
            ));
        }
    }

    for phase in phases {
        if phase.items.is_empty() && phase.checks.is_empty() {
            return Err(EngineError::malformed(
                path,
                format!("line {}: phase {} has no checklist items or gate", phase.line, phase.kind),
            ));
        }
    }

    Ok(())
}

/// `name` or ``name: `command` ``.
fn parse_gate_bullet(path: &Path, line: usize, text: &str) -> EngineResult<Check> {
    match text.split_once(':') {
        Some((name, command)) => {
            let command = command.trim().trim_matches('`').trim();
            let command = (!command.is_empty()).then(|| command.to_string());
            check(path, line, clean_check_name(name), command)
        }
        None => check(path, line, clean_check_name(text), None),
    }
}

fn check(path: &Path, line: usize, name: &str, command: Option<String>) -> EngineResult<Check> {
    if !CHECK_NAME.is_match(name) {
        return Err(EngineError::malformed(path, format!("line {line}: invalid check name '{name}'")));
    }
    let check = Check::new(name.to_lowercase());
    Ok(match command {
        Some(command) => check.with_command(command),
        None => check,
    })
}

fn clean_check_name(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '`' || c == '*').trim()
}

/// Lowercase, dash-separated form of a title.
pub fn slugify(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> EngineResult<ParsedWorkflow> {
        parse_workflow(Path::new("test.md"), content)
    }

    const SERVICE: &str = r#"---
name: python-service
version: 1.2.0
tags: [python, service]
depends_on: [python-development]
---
# Python Service Workflow

Intro prose with a stray checkbox that is ignored:

- [ ] not part of any phase

## Phase 1: RED - write a failing test

- [ ] Write an API test
* [x] Confirm it fails

```bash
# RED comment inside code
- [ ] not an item
```

## Phase 2: GREEN

- [ ] Make the test pass

### Gate

- test: `pytest -q`
- lint

## 3. REFACTOR

  - [ ] Remove duplication

**Gate:** format, typecheck

## COMMIT

+ [X] Commit with a conventional message

## Related Workflows

- [ ] links are ignored
"#;

    #[test]
    fn test_parse_full_document() {
        let doc = parse(SERVICE).unwrap();
        let front = doc.front.unwrap();
        assert_eq!(front.name.as_deref(), Some("python-service"));
        assert_eq!(front.version.as_deref(), Some("1.2.0"));
        assert_eq!(front.tags, vec!["python", "service"]);
        assert_eq!(front.depends_on, vec!["python-development"]);
        assert_eq!(doc.title.as_deref(), Some("Python Service Workflow"));

        let kinds: Vec<_> = doc.phases.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![PhaseKind::Red, PhaseKind::Green, PhaseKind::Refactor, PhaseKind::Commit]
        );

        assert_eq!(doc.phases[0].items, vec!["Write an API test", "Confirm it fails"]);
        assert_eq!(doc.phases[1].items, vec!["Make the test pass"]);
        assert_eq!(
            doc.phases[1].checks,
            vec![Check::new("test").with_command("pytest -q"), Check::new("lint")]
        );
        assert_eq!(doc.phases[2].items, vec!["Remove duplication"]);
        assert_eq!(doc.phases[2].checks, vec![Check::new("format"), Check::new("typecheck")]);
        assert_eq!(doc.phases[3].items, vec!["Commit with a conventional message"]);
    }

    #[test]
    fn test_line_numbers_account_for_front_matter() {
        let doc = parse(SERVICE).unwrap();
        // "## Phase 1: RED" is on line 13 of the file.
        assert_eq!(doc.phases[0].line, 13);
    }

    #[test]
    fn test_subheading_with_phase_word_stays_in_phase() {
        let content = r#"# Doc

## COMMIT

- [ ] Stage changes

### Commit message format

- [ ] Use imperative mood
"#;
        let doc = parse(content).unwrap();
        assert_eq!(doc.phases.len(), 1);
        assert_eq!(doc.phases[0].items, vec!["Stage changes", "Use imperative mood"]);
    }

    #[test]
    fn test_nested_phase_headings() {
        let content = r#"# Doc

## The Cycle

### RED

- [ ] a

### GREEN

- [ ] b

## Troubleshooting

- [ ] not an item
"#;
        let doc = parse(content).unwrap();
        assert_eq!(doc.phases.len(), 2);
        assert_eq!(doc.phases[1].items, vec!["b"]);
    }

    #[test]
    fn test_mixed_heading_is_not_a_phase() {
        assert_eq!(phase_kind_of("RED-GREEN-REFACTOR overview"), None);
        assert_eq!(phase_kind_of("Red phase (red)"), Some(PhaseKind::Red));
        assert_eq!(phase_kind_of("Greenfield setup"), None);
    }

    #[test]
    fn test_no_phases_is_malformed() {
        let err = parse("# Just prose\n\nNothing here.\n").unwrap_err();
        assert!(matches!(err, EngineError::MalformedWorkflow { .. }));
        assert!(err.to_string().contains("no RED"));
    }

    #[test]
    fn test_out_of_order_phases_are_malformed() {
        let err = parse("## GREEN\n- [ ] a\n## RED\n- [ ] b\n").unwrap_err();
        assert!(err.to_string().contains("RED must come before GREEN"));

        let err = parse("## RED\n- [ ] a\n## RED\n- [ ] b\n").unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_empty_phase_is_malformed() {
        let err = parse("## RED\n\nprose only\n\n## GREEN\n- [ ] a\n").unwrap_err();
        assert!(err.to_string().contains("line 1: phase RED has no checklist items"));
    }

    #[test]
    fn test_gate_only_phase_is_allowed() {
        let doc = parse("## RED\n- [ ] a\n## COMMIT\nGate: test\n").unwrap();
        assert!(doc.phases[1].items.is_empty());
        assert_eq!(doc.phases[1].checks, vec![Check::new("test")]);
    }

    #[test]
    fn test_prose_gate_line_is_ignored() {
        let doc = parse("## RED\n- [ ] a\n\nGates: we run these on every push, see CI.\n").unwrap();
        assert_eq!(doc.phases[0].items, vec!["a".to_string()]);
        assert!(doc.phases[0].checks.is_empty());

        let doc = parse("## RED\n- [ ] a\nGates: `test`, **lint**\n").unwrap();
        assert_eq!(doc.phases[0].checks, vec![Check::new("test"), Check::new("lint")]);
    }

    #[test]
    fn test_invalid_check_name() {
        let err = parse("## RED\n- [ ] a\n### Gate\n- run the tests please\n").unwrap_err();
        assert!(err.to_string().contains("invalid check name"));
    }

    #[test]
    fn test_front_matter_errors() {
        let err = parse("---\nname: x\n## RED\n- [ ] a\n").unwrap_err();
        assert!(err.to_string().contains("not terminated"));

        let err = parse("---\ntags: [unclosed\n---\n## RED\n- [ ] a\n").unwrap_err();
        assert!(err.to_string().contains("invalid front matter"));
    }

    #[test]
    fn test_empty_front_matter() {
        let doc = parse("---\n---\n# T\n## RED\n- [ ] a\n").unwrap();
        assert_eq!(doc.front, Some(FrontMatter::default()));
        assert_eq!(doc.phases[0].line, 4);
    }

    #[test]
    fn test_has_front_matter() {
        assert!(has_front_matter("---\nname: a\n---\n"));
        assert!(!has_front_matter("# Title\n---\n"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Python Development Workflow"), "python-development-workflow");
        assert_eq!(slugify("Phase 1: Setup"), "phase-1-setup");
    }
}
