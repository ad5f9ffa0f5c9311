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

use std::collections::BTreeSet;
use std::fmt;

use crate::types::RawConfig;

/// Substring atom. With neither or both of `file_name`/`content` set, the
/// atom searches both and is expanded before compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substring {
    pub pattern: String,
    pub case_sensitive: bool,
    pub file_name: bool,
    pub content: bool,
}

/// Regular expression atom, same targeting rules as `Substring`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regexp {
    pub pattern: String,
    pub case_sensitive: bool,
    pub file_name: bool,
    pub content: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRepos {
    pub branch: String,
    pub repos: BTreeSet<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Regular file results.
    FileMatch,
    /// Only report that the file matched; no line or chunk matches.
    FileName,
}

/// Abstract query tree, as produced by a query parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    And(Vec<Q>),
    Or(Vec<Q>),
    Not(Box<Q>),
    Const(bool),
    Substring(Substring),
    Regexp(Regexp),
    /// Restrict the child (a substring or regexp) to symbol sections.
    Symbol(Box<Q>),
    /// Branch name; `exact` selects equality over substring matching.
    /// `HEAD` always selects the first branch of every repository.
    Branch { pattern: String, exact: bool },
    /// Regular expression over repository names.
    Repo(String),
    RepoSet(BTreeSet<String>),
    RepoIds(BTreeSet<u32>),
    Language(String),
    FileNameSet(BTreeSet<String>),
    BranchesRepos(Vec<BranchRepos>),
    RawConfig(RawConfig),
    Boost { child: Box<Q>, boost: f64 },
    Type { kind: TypeKind, child: Box<Q> },
}

impl Q {
    /// Case-insensitive substring over content and file names.
    pub fn substring(pattern: impl Into<String>) -> Q {
        Q::Substring(Substring {
            pattern: pattern.into(),
            case_sensitive: false,
            file_name: false,
            content: false,
        })
    }

    pub fn content(pattern: impl Into<String>) -> Q {
        Q::Substring(Substring {
            pattern: pattern.into(),
            case_sensitive: false,
            file_name: false,
            content: true,
        })
    }

    pub fn file_name(pattern: impl Into<String>) -> Q {
        Q::Substring(Substring {
            pattern: pattern.into(),
            case_sensitive: false,
            file_name: true,
            content: false,
        })
    }

    pub fn regexp(pattern: impl Into<String>) -> Q {
        Q::Regexp(Regexp {
            pattern: pattern.into(),
            case_sensitive: false,
            file_name: false,
            content: false,
        })
    }

    pub fn and(children: Vec<Q>) -> Q {
        Q::And(children)
    }

    pub fn or(children: Vec<Q>) -> Q {
        Q::Or(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Q) -> Q {
        Q::Not(Box::new(child))
    }

    pub fn symbol(child: Q) -> Q {
        Q::Symbol(Box::new(child))
    }

    pub fn boost(child: Q, boost: f64) -> Q {
        Q::Boost {
            child: Box::new(child),
            boost,
        }
    }

    /// Make substring and regexp atoms case sensitive.
    pub fn case_sensitive(self) -> Q {
        self.map(&|q| match q {
            Q::Substring(mut s) => {
                s.case_sensitive = true;
                Q::Substring(s)
            }
            Q::Regexp(mut r) => {
                r.case_sensitive = true;
                Q::Regexp(r)
            }
            q => q,
        })
    }

    /// Rebuild the tree bottom-up, applying `f` to every node after its
    /// children.
    pub fn map<F: Fn(Q) -> Q>(self, f: &F) -> Q {
        let q = match self {
            Q::And(cs) => Q::And(cs.into_iter().map(|c| c.map(f)).collect()),
            Q::Or(cs) => Q::Or(cs.into_iter().map(|c| c.map(f)).collect()),
            Q::Not(c) => Q::Not(Box::new(c.map(f))),
            Q::Symbol(c) => Q::Symbol(Box::new(c.map(f))),
            Q::Boost { child, boost } => Q::Boost {
                child: Box::new(child.map(f)),
                boost,
            },
            Q::Type { kind, child } => Q::Type {
                kind,
                child: Box::new(child.map(f)),
            },
            leaf => leaf,
        };
        f(q)
    }

    /// Visit every node, parents first.
    pub fn visit<F: FnMut(&Q)>(&self, f: &mut F) {
        f(self);
        match self {
            Q::And(cs) | Q::Or(cs) => cs.iter().for_each(|c| c.visit(f)),
            Q::Not(c) | Q::Symbol(c) => c.visit(f),
            Q::Boost { child, .. } | Q::Type { child, .. } => child.visit(f),
            _ => {}
        }
    }
}

/// Fold constants: `false` kills an And and drops out of an Or, `true`
/// kills an Or and drops out of an And; single-child combinators collapse.
pub fn simplify(q: Q) -> Q {
    match q {
        Q::And(cs) => {
            let mut out = Vec::with_capacity(cs.len());
            for c in cs.into_iter().map(simplify) {
                match c {
                    Q::Const(false) => return Q::Const(false),
                    Q::Const(true) => {}
                    c => out.push(c),
                }
            }
            match out.len() {
                0 => Q::Const(true),
                1 => out.remove(0),
                _ => Q::And(out),
            }
        }
        Q::Or(cs) => {
            let mut out = Vec::with_capacity(cs.len());
            for c in cs.into_iter().map(simplify) {
                match c {
                    Q::Const(true) => return Q::Const(true),
                    Q::Const(false) => {}
                    c => out.push(c),
                }
            }
            match out.len() {
                0 => Q::Const(false),
                1 => out.remove(0),
                _ => Q::Or(out),
            }
        }
        Q::Not(c) => match simplify(*c) {
            Q::Const(v) => Q::Const(!v),
            c => Q::Not(Box::new(c)),
        },
        Q::Symbol(c) => match simplify(*c) {
            Q::Const(v) => Q::Const(v),
            c => Q::Symbol(Box::new(c)),
        },
        Q::Boost { child, boost } => match simplify(*child) {
            Q::Const(v) => Q::Const(v),
            c => Q::Boost {
                child: Box::new(c),
                boost,
            },
        },
        Q::Type { kind, child } => match simplify(*child) {
            Q::Const(v) => Q::Const(v),
            c => Q::Type {
                kind,
                child: Box::new(c),
            },
        },
        q => q,
    }
}

/// Split atoms that target both file names and content into an Or of a
/// file-name atom and a content atom.
pub fn expand_file_content(q: Q) -> Q {
    match q {
        Q::Substring(s) if s.file_name == s.content => {
            let f = Substring {
                file_name: true,
                content: false,
                ..s.clone()
            };
            let c = Substring {
                file_name: false,
                content: true,
                ..s
            };
            Q::Or(vec![Q::Substring(f), Q::Substring(c)])
        }
        Q::Regexp(r) if r.file_name == r.content => {
            let f = Regexp {
                file_name: true,
                content: false,
                ..r.clone()
            };
            let c = Regexp {
                file_name: false,
                content: true,
                ..r
            };
            Q::Or(vec![Q::Regexp(f), Q::Regexp(c)])
        }
        q => q,
    }
}

fn write_children(f: &mut fmt::Formatter<'_>, cs: &[Q]) -> fmt::Result {
    for c in cs {
        write!(f, " {c}")?;
    }
    Ok(())
}

impl fmt::Display for Q {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Q::And(cs) => {
                write!(f, "(and")?;
                write_children(f, cs)?;
                write!(f, ")")
            }
            Q::Or(cs) => {
                write!(f, "(or")?;
                write_children(f, cs)?;
                write!(f, ")")
            }
            Q::Not(c) => write!(f, "(not {c})"),
            Q::Const(v) => write!(f, "{v}"),
            Q::Substring(s) => {
                let scope = match (s.file_name, s.content) {
                    (true, false) => "file_",
                    (false, true) => "content_",
                    _ => "",
                };
                let case = if s.case_sensitive { "case_" } else { "" };
                write!(f, "{scope}{case}substr:{:?}", s.pattern)
            }
            Q::Regexp(r) => {
                let scope = match (r.file_name, r.content) {
                    (true, false) => "file_",
                    (false, true) => "content_",
                    _ => "",
                };
                let case = if r.case_sensitive { "case_" } else { "" };
                write!(f, "{scope}{case}regex:{:?}", r.pattern)
            }
            Q::Symbol(c) => write!(f, "sym:{c}"),
            Q::Branch { pattern, exact } => {
                if *exact {
                    write!(f, "branch={pattern:?}")
                } else {
                    write!(f, "branch:{pattern:?}")
                }
            }
            Q::Repo(re) => write!(f, "repo:{re:?}"),
            Q::RepoSet(set) => write!(f, "(reposet {})", set.iter().cloned().collect::<Vec<_>>().join(" ")),
            Q::RepoIds(ids) => write!(f, "(repoids {})", ids.len()),
            Q::Language(l) => write!(f, "lang:{l}"),
            Q::FileNameSet(set) => write!(f, "(filenameset {})", set.iter().cloned().collect::<Vec<_>>().join(" ")),
            Q::BranchesRepos(list) => {
                write!(f, "(branchesrepos")?;
                for br in list {
                    write!(f, " {}:{}", br.branch, br.repos.len())?;
                }
                write!(f, ")")
            }
            Q::RawConfig(rc) => write!(f, "rawConfig:{:#04x}", rc.0),
            Q::Boost { child, boost } => write!(f, "(boost {boost:.2} {child})"),
            Q::Type { kind, child } => match kind {
                TypeKind::FileMatch => write!(f, "(type:filematch {child})"),
                TypeKind::FileName => write!(f, "(type:filename {child})"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_folding() {
        let q = Q::and(vec![Q::Const(true), Q::or(vec![Q::Const(false), Q::content("abc")])]);
        assert_eq!(simplify(q), Q::content("abc"));
        assert_eq!(simplify(Q::and(vec![Q::content("abc"), Q::not(Q::Const(true))])), Q::Const(false));
        assert_eq!(simplify(Q::or(vec![])), Q::Const(false));
        assert_eq!(simplify(Q::boost(Q::Const(true), 2.0)), Q::Const(true));
    }

    #[test]
    fn expand_splits_unscoped_atoms() {
        let q = Q::substring("foo").map(&expand_file_content);
        match q {
            Q::Or(cs) => {
                assert_eq!(cs.len(), 2);
                assert!(matches!(&cs[0], Q::Substring(s) if s.file_name && !s.content));
                assert!(matches!(&cs[1], Q::Substring(s) if !s.file_name && s.content));
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(Q::content("foo").map(&expand_file_content), Q::content("foo"));
    }

    #[test]
    fn display_is_readable() {
        let q = Q::and(vec![Q::content("a").case_sensitive(), Q::not(Q::Language("Go".into()))]);
        assert_eq!(q.to_string(), r#"(and content_case_substr:"a" (not lang:Go))"#);
    }
}
