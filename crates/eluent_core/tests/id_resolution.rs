use eluent_core::id::resolver::{IdResolver, Resolution};
use eluent_core::id::trie::AtomIndexer;
use eluent_core::id::ulid::{compose_atom_id, extract_randomness, extract_repo_name, generate_ulid};
use eluent_core::model::atom::Atom;
use eluent_core::repo::data_file::Repository;

#[test]
fn repository_indexer_resolves_generated_prefixes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(".eluent")).unwrap();
    std::fs::write(dir.path().join(".eluent/config.yaml"), "repo_name: proj\n").unwrap();
    let mut repo = Repository::init(dir.path()).unwrap();

    let mut ids = Vec::new();
    for index in 0..8 {
        ids.push(repo.create_atom(format!("item {index}")).unwrap().id);
    }

    // Every atom is reachable through its minimum unique prefix.
    for id in &ids {
        let randomness = extract_randomness(id).unwrap();
        let repo_name = extract_repo_name(id).unwrap();
        let min_prefix = repo
            .indexer()
            .minimum_unique_prefix(&randomness, Some(&repo_name))
            .unwrap();
        let matches = repo
            .indexer()
            .find_by_randomness_prefix(&min_prefix, Some(&repo_name));
        assert_eq!(matches.len(), 1);
        assert_eq!(&matches[0].id, id);
    }
}

#[test]
fn resolver_distinguishes_all_outcomes() {
    let mut indexer = AtomIndexer::new();
    let shared = "foo-01JBZTMQ1RABCDEFGHKMNPQRST";
    let sibling = "foo-01JBZTMQ1RABCDEFGHKMNXXXXX";
    indexer.insert(Atom::new(shared, "one"));
    indexer.insert(Atom::new(sibling, "two"));
    let resolver = IdResolver::new(&indexer);

    assert!(matches!(
        resolver.resolve(shared, None),
        Resolution::Hit(atom) if atom.id == shared
    ));
    assert!(matches!(
        resolver.resolve("", None),
        Resolution::InvalidInput { .. }
    ));
    assert!(matches!(
        resolver.resolve(".1", None),
        Resolution::RelativeReference { .. }
    ));
    assert!(matches!(
        resolver.resolve("AB", Some("foo")),
        Resolution::PrefixTooShort { .. }
    ));
    assert!(matches!(
        resolver.resolve("ZZZZZZ", Some("foo")),
        Resolution::NotFound { .. }
    ));

    match resolver.resolve("ABCDEFGH", Some("foo")) {
        Resolution::Ambiguous {
            candidates,
            minimum_prefixes,
        } => {
            assert_eq!(candidates.len(), 2);
            assert_eq!(
                minimum_prefixes.get(shared).map(String::as_str),
                Some("ABCDEFGHKMNP")
            );
            assert_eq!(
                minimum_prefixes.get(sibling).map(String::as_str),
                Some("ABCDEFGHKMNX")
            );
        }
        other => panic!("expected ambiguous resolution, got {other:?}"),
    }
}

#[test]
fn confusable_closure_holds_for_stored_ids() {
    let mut indexer = AtomIndexer::new();
    let id = "foo-01JBZTMQ1RABCDEF0123456712";
    indexer.insert(Atom::new(id, "confusable target"));
    let resolver = IdResolver::new(&indexer);

    // I/L fold to 1, O folds to 0, case is ignored.
    for spelling in ["ABCDEF0123", "abcdef0l23", "ABCDEFO123", "abcdefOI23"] {
        match resolver.resolve(spelling, Some("foo")) {
            Resolution::Hit(atom) => assert_eq!(atom.id, id),
            other => panic!("`{spelling}` should resolve, got {other:?}"),
        }
    }
}

#[test]
fn generated_ids_decompose_into_their_parts() {
    for _ in 0..16 {
        let ulid = generate_ulid().unwrap();
        let id = compose_atom_id("proj", &ulid);
        let repo_name = extract_repo_name(&id).unwrap();
        let randomness = extract_randomness(&id).unwrap();
        assert_eq!(repo_name, "proj");
        assert_eq!(randomness.len(), 16);
        assert!(id.starts_with(&format!("{repo_name}-")));
        assert!(ulid.ends_with(&randomness));
    }
}
