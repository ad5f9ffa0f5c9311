// Copyright 2025 HyperZoekt Project
// Derived from sourcegraph/zoekt (https://github.com/sourcegraph/zoekt)
// Copyright 2016 Google Inc. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Regex analysis: derive from a parsed regex a cheaper trigram plan that
//! matches a superset of what the regex matches, and recognize the shapes
//! (`\bword\b`, `.*`) that have dedicated match-tree nodes.

use regex_syntax::hir::{Class, Hir, HirKind, Look};

use crate::error::{Result, ZoektError};
use crate::trigram::NGRAM_SIZE;

/// Trigram-level approximation of a regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegexPlan {
    /// A literal of at least `NGRAM_SIZE` runes; becomes a substring node.
    Literal(String),
    /// All children must match; `single_line` when no child can span lines.
    And { children: Vec<RegexPlan>, single_line: bool },
    Or(Vec<RegexPlan>),
    /// No trigram information; every document is a candidate.
    All,
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub plan: RegexPlan,
    /// The plan matches exactly what the regex matches, so it can replace
    /// the regex instead of merely filtering for it.
    pub exact: bool,
    pub single_line: bool,
}

/// Parse a pattern for analysis. Case folding is left to the caller so
/// literals stay literals.
pub fn parse(pattern: &str) -> Result<Hir> {
    regex_syntax::ParserBuilder::new()
        .build()
        .parse(pattern)
        .map_err(|e| ZoektError::InvalidQuery(format!("regex {pattern:?}: {e}")))
}

pub fn analyze(hir: &Hir) -> Analysis {
    match hir.kind() {
        HirKind::Literal(lit) => match std::str::from_utf8(&lit.0) {
            Ok(s) if s.chars().count() >= NGRAM_SIZE => Analysis {
                plan: RegexPlan::Literal(s.to_string()),
                exact: true,
                single_line: !s.contains('\n'),
            },
            _ => fallback(),
        },
        HirKind::Capture(cap) => analyze(&cap.sub),
        HirKind::Repetition(rep) if rep.min == 1 => analyze(&rep.sub),
        HirKind::Repetition(rep) if rep.min > 1 => {
            // x{2,} implies x but is not equivalent to it
            Analysis {
                exact: false,
                ..analyze(&rep.sub)
            }
        }
        HirKind::Repetition(rep) if rep.min == 0 && rep.max.is_none() && is_any_char_not_nl(&rep.sub) => {
            Analysis {
                plan: RegexPlan::All,
                exact: false,
                single_line: true,
            }
        }
        HirKind::Concat(subs) => {
            let parts: Vec<Analysis> = subs.iter().map(analyze).collect();
            let exact = parts.len() <= 1 && parts.iter().all(|p| p.exact);
            let single_line = parts.iter().all(|p| p.single_line);
            let children: Vec<RegexPlan> = parts
                .into_iter()
                .map(|p| p.plan)
                .filter(|p| *p != RegexPlan::All)
                .collect();
            let plan = match children.len() {
                0 => RegexPlan::All,
                1 => children.into_iter().next().unwrap_or(RegexPlan::All),
                _ => RegexPlan::And { children, single_line },
            };
            Analysis { plan, exact, single_line }
        }
        HirKind::Alternation(subs) => {
            let parts: Vec<Analysis> = subs.iter().map(analyze).collect();
            let exact = parts.iter().all(|p| p.exact);
            if parts.iter().any(|p| p.plan == RegexPlan::All) {
                return Analysis {
                    plan: RegexPlan::All,
                    exact,
                    single_line: false,
                };
            }
            let plan = if parts.is_empty() {
                RegexPlan::Nothing
            } else {
                RegexPlan::Or(parts.into_iter().map(|p| p.plan).collect())
            };
            Analysis {
                plan,
                exact,
                single_line: false,
            }
        }
        _ => fallback(),
    }
}

fn fallback() -> Analysis {
    Analysis {
        plan: RegexPlan::All,
        exact: false,
        single_line: false,
    }
}

fn is_word_boundary(h: &Hir) -> bool {
    matches!(h.kind(), HirKind::Look(Look::WordUnicode) | HirKind::Look(Look::WordAscii))
}

/// `\bLITERAL\b`, returned as the literal. Only meaningful for case
/// sensitive searches.
pub fn word_literal(hir: &Hir) -> Option<String> {
    let HirKind::Concat(subs) = hir.kind() else {
        return None;
    };
    match subs.as_slice() {
        [l, mid, r] if is_word_boundary(l) && is_word_boundary(r) => match mid.kind() {
            HirKind::Literal(lit) => String::from_utf8(lit.0.to_vec()).ok(),
            _ => None,
        },
        _ => None,
    }
}

fn is_any_char_not_nl(h: &Hir) -> bool {
    match h.kind() {
        HirKind::Class(Class::Unicode(c)) => {
            let r: Vec<(u32, u32)> = c.iter().map(|r| (r.start() as u32, r.end() as u32)).collect();
            r == [(0, 0x10FFFF)] || r == [(0, 9), (11, 0x10FFFF)]
        }
        HirKind::Class(Class::Bytes(c)) => {
            let r: Vec<(u8, u8)> = c.iter().map(|r| (r.start(), r.end())).collect();
            r == [(0, 0xFF)] || r == [(0, 9), (11, 0xFF)]
        }
        _ => false,
    }
}

/// True for `.*` and equivalents wrapped in groups: the regex matches at
/// every position, so symbol searches can take whole sections.
pub fn is_match_all(hir: &Hir) -> bool {
    let mut h = hir;
    loop {
        match h.kind() {
            HirKind::Repetition(rep) if rep.min == 0 && rep.max.is_none() => return is_any_char_not_nl(&rep.sub),
            HirKind::Capture(cap) => h = &*cap.sub,
            HirKind::Concat(subs) if subs.len() == 1 => h = &subs[0],
            _ => return false,
        }
    }
}

/// Whether any match of the regex can contain a newline.
pub fn can_match_newline(hir: &Hir) -> bool {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => false,
        HirKind::Literal(lit) => lit.0.contains(&b'\n'),
        HirKind::Class(Class::Unicode(c)) => c.iter().any(|r| r.start() <= '\n' && '\n' <= r.end()),
        HirKind::Class(Class::Bytes(c)) => c.iter().any(|r| r.start() <= b'\n' && b'\n' <= r.end()),
        HirKind::Repetition(rep) => can_match_newline(&rep.sub),
        HirKind::Capture(cap) => can_match_newline(&cap.sub),
        HirKind::Concat(subs) | HirKind::Alternation(subs) => subs.iter().any(can_match_newline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn an(p: &str) -> Analysis {
        analyze(&parse(p).unwrap())
    }

    #[test]
    fn plain_literal_is_exact() {
        let a = an("foobar");
        assert_eq!(a.plan, RegexPlan::Literal("foobar".into()));
        assert!(a.exact);
        assert!(a.single_line);
    }

    #[test]
    fn short_literal_needs_regex() {
        let a = an("ab");
        assert_eq!(a.plan, RegexPlan::All);
        assert!(!a.exact);
    }

    #[test]
    fn concat_with_wildcard_is_single_line_and() {
        let a = an("foo.*bar");
        assert!(!a.exact);
        assert!(a.single_line);
        match a.plan {
            RegexPlan::And { children, single_line } => {
                assert!(single_line);
                assert_eq!(children, vec![RegexPlan::Literal("foo".into()), RegexPlan::Literal("bar".into())]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn plus_and_capture_are_transparent() {
        assert_eq!(an("(hello)+").plan, RegexPlan::Literal("hello".into()));
        let rep = an("(hello){2}");
        assert_eq!(rep.plan, RegexPlan::Literal("hello".into()));
        assert!(!rep.exact);
    }

    #[test]
    fn alternation_with_unknown_branch_is_all() {
        assert_eq!(an("hello|[a-z]+").plan, RegexPlan::All);
        let a = an("hello|world");
        assert!(matches!(a.plan, RegexPlan::Or(_) | RegexPlan::And { .. }));
        assert!(!a.single_line);
    }

    #[test]
    fn word_and_match_all_shapes() {
        assert_eq!(word_literal(&parse(r"\bfoo\b").unwrap()).as_deref(), Some("foo"));
        assert_eq!(word_literal(&parse(r"\bfoo").unwrap()), None);
        assert!(is_match_all(&parse(".*").unwrap()));
        assert!(is_match_all(&parse("(.*)").unwrap()));
        assert!(!is_match_all(&parse("a.*").unwrap()));
    }

    #[test]
    fn newline_detection() {
        assert!(!can_match_newline(&parse("foo.*bar").unwrap()));
        assert!(can_match_newline(&parse(r"foo\sbar").unwrap()));
        assert!(can_match_newline(&parse("(?s)a.b").unwrap()));
    }
}
