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

//! Translation of a query tree into a match tree for one shard.

use regex::bytes::{Regex, RegexBuilder};

use super::hits::iterate_ngrams;
use super::matchtree::{
    BranchNode, DocMatchNode, DocPredicate, MatchTree, Node, RegexpNode, SubstrNode, SymbolRegexpNode, WordNode,
};
use crate::error::{Result, ZoektError};
use crate::query::ast::{Regexp, Substring, TypeKind, Q};
use crate::regex_analyze::{analyze, is_match_all, parse, word_literal, RegexPlan};
use crate::shard::IndexData;
use crate::trigram::{rune_count, NGRAM_SIZE};
use crate::types::Repository;

#[derive(Clone, Copy)]
struct Compiler<'a> {
    d: &'a IndexData,
    /// Symbol searches need a regex node to run per section, so `\bword\b`
    /// must not become a word node below them.
    disable_word_optimization: bool,
}

/// Compile `q` against `d`. Atoms must already target either file names or
/// content, see `expand_file_content`.
pub(crate) fn build<'a>(d: &'a IndexData, q: &Q) -> Result<MatchTree<'a>> {
    Compiler {
        d,
        disable_word_optimization: false,
    }
    .compile(q)
}

fn regex_for(pattern: &str, case_sensitive: bool) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern).case_insensitive(!case_sensitive).build()?)
}

impl<'a> Compiler<'a> {
    fn compile(&self, q: &Q) -> Result<MatchTree<'a>> {
        let node = match q {
            Q::And(cs) => Node::And(cs.iter().map(|c| self.compile(c)).collect::<Result<_>>()?),
            Q::Or(cs) => Node::Or(cs.iter().map(|c| self.compile(c)).collect::<Result<_>>()?),
            Q::Not(c) => Node::Not(Box::new(self.compile(c)?)),
            Q::Const(true) => Node::BruteForce,
            Q::Const(false) => Node::NoMatch("const"),
            Q::Substring(s) => return self.substring(s),
            Q::Regexp(r) => return self.regexp(r),
            Q::Symbol(c) => return self.symbol(c),
            Q::Boost { child, boost } => Node::Boost(Box::new(self.compile(child)?), *boost),
            Q::Type { kind, child } => match kind {
                TypeKind::FileName => Node::FileName(Box::new(self.compile(child)?)),
                TypeKind::FileMatch => return self.compile(child),
            },
            Q::Branch { pattern, exact } => self.branch(pattern, *exact),
            Q::Language(name) => match self.d.language_code_of(name) {
                Some(code) => Node::DocMatch(DocMatchNode::new(self.d, "language", DocPredicate::Language(code))),
                None => Node::NoMatch("language"),
            },
            Q::Repo(pattern) => {
                let re = regex::Regex::new(pattern)?;
                self.repos("repo", |r| re.is_match(&r.name))
            }
            Q::RepoSet(names) => self.repos("reposet", |r| names.contains(&r.name)),
            Q::RepoIds(ids) => self.repos("repoids", |r| ids.contains(&r.id)),
            Q::FileNameSet(names) => {
                let mut docs = vec![false; self.d.num_docs() as usize];
                for (doc, slot) in docs.iter_mut().enumerate() {
                    let name = self.d.file_name(doc as u32)?;
                    *slot = std::str::from_utf8(name).is_ok_and(|n| names.contains(n));
                }
                if docs.iter().any(|&b| b) {
                    Node::DocMatch(DocMatchNode::new(self.d, "filenameset", DocPredicate::Docs(docs)))
                } else {
                    Node::NoMatch("filenameset")
                }
            }
            Q::BranchesRepos(list) => {
                let mut masks = vec![0u64; self.d.repositories().len()];
                for (i, repo) in self.d.repositories().iter().enumerate() {
                    for br in list.iter().filter(|br| br.repos.contains(&repo.id)) {
                        masks[i] |= self.d.branch_bit(i, &br.branch).unwrap_or(0);
                    }
                }
                if masks.iter().all(|&m| m == 0) {
                    Node::NoMatch("branchesrepos")
                } else {
                    Node::DocMatch(DocMatchNode::new(self.d, "branchesrepos", DocPredicate::BranchMasks(masks)))
                }
            }
            Q::RawConfig(flags) => Node::DocMatch(DocMatchNode::new(self.d, "rawconfig", DocPredicate::RawConfig(*flags))),
        };
        Ok(node.into())
    }

    fn repos(&self, reason: &'static str, f: impl Fn(&Repository) -> bool) -> Node<'a> {
        let set: Vec<bool> = self.d.repositories().iter().map(f).collect();
        if set.iter().any(|&b| b) {
            Node::DocMatch(DocMatchNode::new(self.d, reason, DocPredicate::Repos(set)))
        } else {
            Node::NoMatch(reason)
        }
    }

    fn branch(&self, pattern: &str, exact: bool) -> Node<'a> {
        let masks: Vec<u64> = (0..self.d.repositories().len())
            .map(|i| {
                // HEAD is the first declared branch of every repository
                if pattern == "HEAD" {
                    return 1;
                }
                self.d
                    .branch_ids(i)
                    .iter()
                    .filter(|(name, _)| if exact { name.as_str() == pattern } else { name.contains(pattern) })
                    .fold(0, |m, (_, bit)| m | bit)
            })
            .collect();
        if masks.iter().all(|&m| m == 0) {
            return Node::NoMatch("branch");
        }
        Node::Branch(BranchNode::new(self.d, pattern.to_string(), masks))
    }

    fn substring(&self, s: &Substring) -> Result<MatchTree<'a>> {
        if rune_count(s.pattern.as_bytes()) < NGRAM_SIZE {
            let re = regex_for(&regex::escape(&s.pattern), s.case_sensitive)?;
            return Ok(Node::Regexp(RegexpNode::new(re, s.file_name)).into());
        }
        Ok(match iterate_ngrams(self.d, s)? {
            Some(iter) => Node::Substr(SubstrNode::new(self.d, s.clone(), iter)).into(),
            None => Node::NoMatch("ngram").into(),
        })
    }

    fn regexp(&self, r: &Regexp) -> Result<MatchTree<'a>> {
        let hir = parse(&r.pattern)?;
        let an = analyze(&hir);
        let plan = self.plan(&an.plan, r)?;
        if an.exact {
            return Ok(plan);
        }

        let word = if r.case_sensitive && !self.disable_word_optimization {
            word_literal(&hir)
        } else {
            None
        };
        let leaf = match word {
            Some(w) => Node::Word(WordNode::new(w.into_bytes(), r.file_name)),
            None => Node::Regexp(RegexpNode::new(regex_for(&r.pattern, r.case_sensitive)?, r.file_name)),
        };
        Ok(Node::And(vec![leaf.into(), Node::NoVisit(Box::new(plan)).into()]).into())
    }

    /// Trigram filter for a regex: literals become substring nodes with the
    /// regex's targeting and case sensitivity.
    fn plan(&self, p: &RegexPlan, r: &Regexp) -> Result<MatchTree<'a>> {
        Ok(match p {
            RegexPlan::Literal(lit) => {
                return self.substring(&Substring {
                    pattern: lit.clone(),
                    case_sensitive: r.case_sensitive,
                    file_name: r.file_name,
                    content: r.content,
                })
            }
            RegexPlan::And { children, single_line } => {
                let cs = children.iter().map(|c| self.plan(c, r)).collect::<Result<Vec<_>>>()?;
                if *single_line && !r.file_name {
                    Node::AndLine(cs).into()
                } else {
                    Node::And(cs).into()
                }
            }
            RegexPlan::Or(children) => {
                Node::Or(children.iter().map(|c| self.plan(c, r)).collect::<Result<_>>()?).into()
            }
            RegexPlan::All => Node::BruteForce.into(),
            RegexPlan::Nothing => Node::NoMatch("regexp").into(),
        })
    }

    fn symbol(&self, child: &Q) -> Result<MatchTree<'a>> {
        let sub = Compiler {
            disable_word_optimization: true,
            ..*self
        }
        .compile(child)?;
        let node = match sub.node {
            Node::Substr(s) => Node::SymbolSubstr(s),
            Node::NoMatch(why) => Node::NoMatch(why),
            node => {
                let sub: MatchTree<'a> = node.into();
                let mut regex = None;
                sub.walk(&mut |t| {
                    if regex.is_none() {
                        if let Node::Regexp(r) = &t.node {
                            regex = Some(r.regex.clone());
                        }
                    }
                });
                let Some(regex) = regex else {
                    return Err(ZoektError::InvalidQuery(format!("symbol search over {child}")));
                };
                let all = is_match_all(&parse(regex.as_str())?);
                Node::SymbolRegexp(SymbolRegexpNode::new(sub, regex, all))
            }
        };
        Ok(node.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::IndexBuilder;
    use crate::types::Document;

    fn shard() -> IndexData {
        let repo = Repository::new(7, "github.com/x/y").with_branches(&[("main", "v1"), ("dev", "v2")]);
        let mut b = IndexBuilder::new(Some(repo)).unwrap();
        b.add(Document::new("a.go", "package main\nfunc helloWorld() {}\n").with_branches(&["main"]).with_language("Go"))
            .unwrap();
        b.add(Document::new("b.rs", "fn hello_world() {}\n").with_branches(&["dev"]).with_language("Rust"))
            .unwrap();
        IndexData::from_bytes("t", b.to_bytes().unwrap()).unwrap()
    }

    fn kind(t: &MatchTree<'_>) -> &'static str {
        match &t.node {
            Node::And(_) => "and",
            Node::AndLine(_) => "andline",
            Node::Or(_) => "or",
            Node::Not(_) => "not",
            Node::Boost(..) => "boost",
            Node::NoVisit(_) => "novisit",
            Node::FileName(_) => "filename",
            Node::Substr(_) => "substr",
            Node::SymbolSubstr(_) => "symbolsubstr",
            Node::Regexp(_) => "regexp",
            Node::Word(_) => "word",
            Node::SymbolRegexp(_) => "symbolregexp",
            Node::Branch(_) => "branch",
            Node::DocMatch(_) => "docmatch",
            Node::BruteForce => "bruteforce",
            Node::NoMatch(_) => "nomatch",
        }
    }

    #[test]
    fn substrings_by_length_and_presence() {
        let d = shard();
        assert_eq!(kind(&build(&d, &Q::content("hello")).unwrap()), "substr");
        assert_eq!(kind(&build(&d, &Q::content("he")).unwrap()), "regexp");
        assert_eq!(kind(&build(&d, &Q::content("zebra")).unwrap()), "nomatch");
    }

    #[test]
    fn regexps() {
        let d = shard();
        let exact = Q::Regexp(Regexp {
            pattern: "hello".into(),
            case_sensitive: false,
            file_name: false,
            content: true,
        });
        assert_eq!(kind(&build(&d, &exact).unwrap()), "substr");

        let filtered = Q::Regexp(Regexp {
            pattern: "func.*World".into(),
            case_sensitive: false,
            file_name: false,
            content: true,
        });
        let t = build(&d, &filtered).unwrap();
        assert_eq!(kind(&t), "and");
        assert_eq!(kind(&t.children()[0]), "regexp");
        assert_eq!(kind(&t.children()[1]), "novisit");
        assert_eq!(kind(&t.children()[1].children()[0]), "andline");

        let word = Q::Regexp(Regexp {
            pattern: r"\bmain\b".into(),
            case_sensitive: true,
            file_name: false,
            content: true,
        });
        assert_eq!(kind(&build(&d, &word).unwrap().children()[0]), "word");
        assert_eq!(kind(&build(&d, &Q::symbol(word)).unwrap()), "symbolregexp");
    }

    #[test]
    fn metadata_predicates() {
        let d = shard();
        let br = |p: &str, exact| Q::Branch {
            pattern: p.into(),
            exact,
        };
        assert_eq!(kind(&build(&d, &br("HEAD", true)).unwrap()), "branch");
        assert_eq!(kind(&build(&d, &br("de", false)).unwrap()), "branch");
        assert_eq!(kind(&build(&d, &br("de", true)).unwrap()), "nomatch");
        assert_eq!(kind(&build(&d, &Q::Language("Go".into())).unwrap()), "docmatch");
        assert_eq!(kind(&build(&d, &Q::Language("Cobol".into())).unwrap()), "nomatch");
        assert_eq!(kind(&build(&d, &Q::Repo("x/y$".into())).unwrap()), "docmatch");
        assert_eq!(kind(&build(&d, &Q::RepoIds([8].into_iter().collect())).unwrap()), "nomatch");
        let names = Q::FileNameSet(["b.rs".to_string()].into_iter().collect());
        assert_eq!(kind(&build(&d, &names).unwrap()), "docmatch");
    }

    #[test]
    fn symbol_of_substring_is_symbol_substr() {
        let d = shard();
        assert_eq!(kind(&build(&d, &Q::symbol(Q::content("hello"))).unwrap()), "symbolsubstr");
        assert_eq!(kind(&build(&d, &Q::symbol(Q::content("fn"))).unwrap()), "symbolregexp");
    }
}
