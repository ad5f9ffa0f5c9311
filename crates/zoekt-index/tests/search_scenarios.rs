mod common;

use anyhow::Result;
use common::{builder, names, new_dir, open_shard};
use zoekt_index::query::{BranchRepos, Regexp};
use zoekt_index::types::FlushReason;
use zoekt_index::{
    Cancellation, Document, DocumentSection, IndexBuilder, IndexData, Repository, SearchOptions, Symbol, Q,
};

fn search(d: &IndexData, q: &Q) -> Result<zoekt_index::SearchResult> {
    Ok(d.search(q, &SearchOptions::default(), &Cancellation::new())?)
}

#[test]
fn common_word_matches_start_of_each_line() -> Result<()> {
    let dir = new_dir();
    let d = open_shard(
        dir.path(),
        1,
        "repo",
        &[("a.txt", "the quick brown fox"), ("b.txt", "the lazy dog")],
    )?;

    let res = search(&d, &Q::substring("the"))?;
    assert_eq!(res.files.len(), 2);
    for fm in &res.files {
        assert_eq!(fm.line_matches.len(), 1, "{}", fm.file_name);
        let lm = &fm.line_matches[0];
        assert_eq!(lm.line_number, 1);
        assert!(!lm.file_name);
        assert_eq!(lm.line_fragments.len(), 1);
        assert_eq!(lm.line_fragments[0].offset, 0);
        assert_eq!(lm.line_fragments[0].line_offset, 0);
        assert_eq!(lm.line_fragments[0].match_length, 3);
    }
    let a = res.files.iter().find(|f| f.file_name == "a.txt").unwrap();
    assert_eq!(a.line_matches[0].line, b"the quick brown fox");
    assert_eq!(res.stats.match_count, 2);
    assert_eq!(res.stats.file_count, 2);
    Ok(())
}

#[test]
fn conjunction_without_common_document_finds_nothing() -> Result<()> {
    let dir = new_dir();
    let d = open_shard(
        dir.path(),
        1,
        "repo",
        &[("a.txt", "the quick brown fox"), ("b.txt", "the lazy dog")],
    )?;

    let res = search(&d, &Q::and(vec![Q::substring("fox"), Q::substring("dog")]))?;
    assert!(res.files.is_empty());
    assert_eq!(res.stats.match_count, 0);

    // an absent trigram removes the whole tree before any document is visited
    let res = search(&d, &Q::and(vec![Q::content("fox"), Q::content("zebra")]))?;
    assert!(res.files.is_empty());
    assert_eq!(res.stats.files_considered, 0);
    assert_eq!(res.stats.shards_skipped_filter, 1);
    Ok(())
}

#[test]
fn boolean_combinations() -> Result<()> {
    let dir = new_dir();
    let d = open_shard(
        dir.path(),
        1,
        "repo",
        &[
            ("a.txt", "apple banana\n"),
            ("b.txt", "banana cherry\n"),
            ("c.txt", "cherry date\n"),
        ],
    )?;

    let res = search(&d, &Q::content("banana"))?;
    assert_eq!(names(&res.files), vec!["a.txt", "b.txt"]);

    let res = search(&d, &Q::and(vec![Q::content("banana"), Q::content("cherry")]))?;
    assert_eq!(names(&res.files), vec!["b.txt"]);

    let res = search(&d, &Q::or(vec![Q::content("apple"), Q::content("date")]))?;
    assert_eq!(names(&res.files), vec!["a.txt", "c.txt"]);

    let res = search(&d, &Q::and(vec![Q::content("cherry"), Q::not(Q::content("banana"))]))?;
    assert_eq!(names(&res.files), vec!["c.txt"]);

    let res = search(&d, &Q::not(Q::content("cherry")))?;
    assert_eq!(names(&res.files), vec!["a.txt"]);
    Ok(())
}

#[test]
fn case_sensitivity_and_short_patterns() -> Result<()> {
    let dir = new_dir();
    let d = open_shard(
        dir.path(),
        1,
        "repo",
        &[("Main.go", "func Main() {}\n"), ("util.go", "func main() {}\n")],
    )?;

    let res = search(&d, &Q::content("MAIN"))?;
    assert_eq!(res.files.len(), 2);

    let res = search(&d, &Q::content("Main").case_sensitive())?;
    assert_eq!(names(&res.files), vec!["Main.go"]);

    // below trigram size the pattern is scanned for directly
    let res = search(&d, &Q::content("{}"))?;
    assert_eq!(res.files.len(), 2);
    Ok(())
}

#[test]
fn file_name_and_regexp_atoms() -> Result<()> {
    let dir = new_dir();
    let d = open_shard(
        dir.path(),
        1,
        "repo",
        &[
            ("src/parser.rs", "fn parse_expr() {}\nfn parse_stmt() {}\n"),
            ("src/lexer.rs", "fn next_token() {}\n"),
            ("README.md", "parser and lexer\n"),
        ],
    )?;

    let res = search(&d, &Q::file_name("parser"))?;
    assert_eq!(names(&res.files), vec!["src/parser.rs"]);
    let lm = &res.files[0].line_matches;
    assert_eq!(lm.len(), 1);
    assert!(lm[0].file_name);

    let res = search(&d, &Q::regexp(r"parse_(expr|stmt)"))?;
    assert_eq!(names(&res.files), vec!["src/parser.rs"]);
    assert_eq!(res.files[0].line_matches.len(), 2);
    assert_eq!(res.stats.match_count, 2);

    let res = search(&d, &Q::regexp(r"^fn \w+_token"))?;
    assert_eq!(names(&res.files), vec!["src/lexer.rs"]);
    Ok(())
}

#[test]
fn context_lines_and_chunks() -> Result<()> {
    let dir = new_dir();
    let d = open_shard(dir.path(), 1, "repo", &[("f.txt", "one\ntwo\nneedle\nfour\nfive\n")])?;

    let opts = SearchOptions {
        num_context_lines: 1,
        ..Default::default()
    };
    let res = d.search(&Q::content("needle"), &opts, &Cancellation::new())?;
    let lm = &res.files[0].line_matches[0];
    assert_eq!(lm.line_number, 3);
    assert_eq!(lm.before, b"two\n");
    assert_eq!(lm.after, b"four\n");

    let opts = SearchOptions {
        chunk_matches: true,
        num_context_lines: 1,
        ..Default::default()
    };
    let res = d.search(&Q::content("needle"), &opts, &Cancellation::new())?;
    let fm = &res.files[0];
    assert!(fm.line_matches.is_empty());
    assert_eq!(fm.chunk_matches.len(), 1);
    let cm = &fm.chunk_matches[0];
    assert_eq!(cm.content, b"two\nneedle\nfour\n");
    assert_eq!(cm.content_start.line_number, 2);
    assert_eq!(cm.ranges.len(), 1);
    assert_eq!(cm.ranges[0].start.line_number, 3);
    assert_eq!(cm.ranges[0].start.column, 1);
    Ok(())
}

#[test]
fn symbol_queries_only_match_inside_sections() -> Result<()> {
    let content = "func handler() {}\n// handler is called from main\n";
    let sym = Symbol {
        sym: "handler".into(),
        kind: "function".into(),
        ..Default::default()
    };
    let mut b = IndexBuilder::new(Some(Repository::new(1, "repo")))?;
    b.add(
        Document::new("h.go", content)
            .with_language("Go")
            .with_symbol(DocumentSection { start: 5, end: 12 }, Some(sym)),
    )?;
    b.add(Document::new("other.go", "// handler\n").with_language("Go"))?;
    let d = IndexData::from_bytes("sym", b.to_bytes()?)?;

    let res = search(&d, &Q::symbol(Q::content("handler")))?;
    assert_eq!(names(&res.files), vec!["h.go"]);
    let lm = &res.files[0].line_matches;
    assert_eq!(lm.len(), 1);
    assert_eq!(lm[0].line_number, 1);
    let info = lm[0].line_fragments[0].symbol_info.as_ref().unwrap();
    assert_eq!(info.kind, "function");

    let re = Q::Regexp(Regexp {
        pattern: "hand.er".into(),
        case_sensitive: false,
        file_name: false,
        content: true,
    });
    let res = search(&d, &Q::symbol(re))?;
    assert_eq!(names(&res.files), vec!["h.go"]);
    Ok(())
}

#[test]
fn metadata_predicates() -> Result<()> {
    let repo = Repository::new(7, "github.com/org/tool").with_branches(&[("main", "aaa"), ("dev", "bbb")]);
    let mut b = IndexBuilder::new(Some(repo))?;
    b.add(Document::new("a.go", "package tool\n").with_branches(&["main"]).with_language("Go"))?;
    b.add(
        Document::new("b.py", "import tool\n")
            .with_branches(&["main", "dev"])
            .with_language("Python"),
    )?;
    let d = IndexData::from_bytes("meta", b.to_bytes()?)?;

    let res = search(&d, &Q::and(vec![Q::content("tool"), Q::Language("Python".into())]))?;
    assert_eq!(names(&res.files), vec!["b.py"]);

    let dev = Q::Branch {
        pattern: "dev".into(),
        exact: true,
    };
    let res = search(&d, &Q::and(vec![Q::content("tool"), dev]))?;
    assert_eq!(names(&res.files), vec!["b.py"]);
    assert_eq!(res.files[0].branches, vec!["dev".to_string()]);
    assert_eq!(res.files[0].version, "bbb");

    let res = search(&d, &Q::and(vec![Q::content("tool"), Q::Repo("org/tool$".into())]))?;
    assert_eq!(res.files.len(), 2);
    let res = search(&d, &Q::and(vec![Q::content("tool"), Q::Repo("other".into())]))?;
    assert!(res.files.is_empty());
    assert_eq!(res.stats.shards_skipped_filter, 1);

    let res = search(&d, &Q::and(vec![Q::content("tool"), Q::RepoIds([7].into())]))?;
    assert_eq!(res.files.len(), 2);

    let br = Q::BranchesRepos(vec![BranchRepos {
        branch: "dev".into(),
        repos: [7].into(),
    }]);
    let res = search(&d, &Q::and(vec![Q::content("tool"), br]))?;
    assert_eq!(names(&res.files), vec!["b.py"]);

    let res = search(&d, &Q::and(vec![Q::content("tool"), Q::FileNameSet(["a.go".to_string()].into())]))?;
    assert_eq!(names(&res.files), vec!["a.go"]);
    Ok(())
}

#[test]
fn repository_match_cap_limits_each_repository() -> Result<()> {
    let a = builder(
        1,
        "repo-a",
        &[("a1.txt", "needle\n"), ("a2.txt", "needle\n"), ("a3.txt", "needle\n")],
    )?;
    let b = builder(2, "repo-b", &[("b1.txt", "needle\n")])?;
    let da = IndexData::from_bytes("a", a.to_bytes()?)?;
    let db = IndexData::from_bytes("b", b.to_bytes()?)?;
    let m = IndexData::from_bytes("m", zoekt_index::shard::merge::merge_to_bytes(&[&da, &db])?)?;

    let opts = SearchOptions {
        shard_repo_max_match_count: 1,
        ..Default::default()
    };
    let res = m.search(&Q::content("needle"), &opts, &Cancellation::new())?;
    assert_eq!(res.files.len(), 2);
    let mut owners: Vec<u32> = res.files.iter().map(|f| f.repository_id).collect();
    owners.sort();
    assert_eq!(owners, vec![1, 2]);
    assert_eq!(res.stats.files_skipped, 2);
    Ok(())
}

#[test]
fn cancelled_search_skips_remaining_documents() -> Result<()> {
    let dir = new_dir();
    let d = open_shard(
        dir.path(),
        1,
        "repo",
        &[("a.txt", "needle\n"), ("b.txt", "needle\n"), ("c.txt", "needle\n")],
    )?;
    let cancel = Cancellation::new();
    cancel.cancel();
    let res = d.search(&Q::content("needle"), &SearchOptions::default(), &cancel)?;
    assert!(res.files.is_empty());
    assert_eq!(res.stats.flush_reason, FlushReason::Timeout);
    assert_eq!(res.stats.files_skipped, d.num_docs() as usize);
    assert_eq!(res.stats.files_considered, 0);
    Ok(())
}

#[test]
fn shard_match_cap_flushes() -> Result<()> {
    let dir = new_dir();
    let files: Vec<(String, String)> = (0..10).map(|i| (format!("f{i}.txt"), "needle\n".to_string())).collect();
    let refs: Vec<(&str, &str)> = files.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect();
    let d = open_shard(dir.path(), 1, "repo", &refs)?;

    let opts = SearchOptions {
        shard_max_match_count: 3,
        ..Default::default()
    };
    let res = d.search(&Q::content("needle"), &opts, &Cancellation::new())?;
    assert_eq!(res.files.len(), 3);
    assert_eq!(res.stats.flush_reason, FlushReason::MaxSize);
    assert_eq!(res.stats.files_skipped, 7);

    let opts = SearchOptions {
        max_doc_display_count: 4,
        ..Default::default()
    };
    let res = d.search(&Q::content("needle"), &opts, &Cancellation::new())?;
    assert_eq!(res.files.len(), 4);
    assert_eq!(res.stats.match_count, 10);
    Ok(())
}

#[test]
fn bm25_ranks_repeated_terms_first() -> Result<()> {
    let dir = new_dir();
    let d = open_shard(
        dir.path(),
        1,
        "repo",
        &[
            ("once.txt", "alpha and a lot of other words to make this longer\n"),
            ("many.txt", "alpha alpha alpha\n"),
        ],
    )?;
    let opts = SearchOptions {
        use_bm25_scoring: true,
        ..Default::default()
    };
    let res = d.search(&Q::content("alpha"), &opts, &Cancellation::new())?;
    assert_eq!(res.files.len(), 2);
    assert_eq!(res.files[0].file_name, "many.txt");
    assert!(res.files[0].score > res.files[1].score);
    Ok(())
}

#[test]
fn estimate_only_counts_documents() -> Result<()> {
    let dir = new_dir();
    let d = open_shard(dir.path(), 1, "repo", &[("a", "xyz\n"), ("b", "abc\n")])?;
    let opts = SearchOptions {
        estimate_doc_count: true,
        ..Default::default()
    };
    let res = d.search(&Q::content("xyz"), &opts, &Cancellation::new())?;
    assert!(res.files.is_empty());
    assert_eq!(res.stats.file_count, 2);
    Ok(())
}
