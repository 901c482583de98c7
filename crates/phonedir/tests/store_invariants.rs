//! End-to-end store behavior on real record forests.
//!
//! Each test builds a forest in a temp directory, drives the public store
//! API, then inspects the files on disk.

use phonedir::{
    DirectoryConfig, DirectoryStore, EditOutcome, ErrorKind, Extension, ExtensionKey,
    MoveDestination, PartialFailure, PathResolver, ResolveError, StoreError,
};
use phonedir::{BranchId, LocalityId, ZoneId};
use phonedir_test_utils::{
    sample_forest, FixtureItem, TestForest, SAMPLE_EXTENSION_COUNT, TEST_BASE_URL,
};
use std::collections::HashSet;
use std::fs;

fn open(forest: &TestForest) -> DirectoryStore {
    let mut config = DirectoryConfig::new(forest.root());
    config.base_url = TEST_BASE_URL.to_string();
    DirectoryStore::open(config).expect("open store")
}

fn locality(id: &str) -> LocalityId {
    LocalityId::parse(id).unwrap()
}

fn zone(id: &str) -> ZoneId {
    ZoneId::parse(id).unwrap()
}

fn keys_of(store: &DirectoryStore, id: &str) -> Vec<ExtensionKey> {
    store
        .get_locality(&locality(id))
        .unwrap()
        .extensions
        .iter()
        .map(|e| e.key())
        .collect()
}

fn assert_unique(store: &DirectoryStore, id: &str) {
    let keys = keys_of(store, id);
    let distinct: HashSet<_> = keys.iter().collect();
    assert_eq!(distinct.len(), keys.len(), "duplicate keys in {id}: {keys:?}");
}

#[test]
fn add_then_delete_restores_locality() {
    let forest = sample_forest();
    forest.locality(
        "bavaro",
        "Bavaro",
        &[("Recepcion - Maria Lopez", "2200"), ("Caja 2", "2202")],
    );
    let store = open(&forest);
    let before = store.get_locality(&locality("bavaro")).unwrap();

    store
        .add_extension(&locality("bavaro"), "Caja 1", "2201", None)
        .unwrap();
    assert_eq!(forest.telephones("bavaro"), vec!["2200", "2202", "2201"]);

    store
        .delete_extension(&locality("bavaro"), "Caja 1", "2201")
        .unwrap();
    assert_eq!(store.get_locality(&locality("bavaro")).unwrap(), before);
    forest.assert_no_temp_files();
}

#[test]
fn keys_stay_unique_through_add_edit_and_move() {
    let forest = sample_forest();
    let store = open(&forest);

    let err = store
        .add_extension(&locality("bavaro"), "Caja 1", "2201", Some("Pedro"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = store
        .edit_extension(
            &locality("bavaro"),
            &ExtensionKey::new("Caja 2", "2202"),
            "Caja 1",
            "2201",
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Same number under another department is a different extension.
    store
        .add_extension(&locality("bavaro"), "Caja 3", "2201", None)
        .unwrap();

    store
        .add_extension(&locality("santiago"), "Caja 1", "2201", None)
        .unwrap();
    let report = store
        .move_extensions(
            &[ExtensionKey::new("Caja 1", "2201")],
            &locality("santiago"),
            &zone("zona-este"),
            MoveDestination::Existing(locality("bavaro")),
        )
        .unwrap();
    assert_eq!(report.moved(), 0);
    assert_eq!(report.rejected(), 1);

    for id in ["bavaro", "higuey", "romana", "santiago"] {
        assert_unique(&store, id);
    }
}

#[test]
fn edit_keeps_contact_and_position() {
    let forest = sample_forest();
    let store = open(&forest);
    let outcome = store
        .edit_extension(
            &locality("bavaro"),
            &ExtensionKey::new("Recepcion", "2200"),
            "Lobby",
            "2299",
        )
        .unwrap();
    assert_eq!(
        outcome,
        EditOutcome::Applied(Extension {
            department: "Lobby".to_string(),
            number: "2299".to_string(),
            name: Some("Maria Lopez".to_string()),
        })
    );
    let directory = forest.read_directory("localities/bavaro.xml");
    assert_eq!(directory.children[0].name, "Lobby - Maria Lopez");
    assert_eq!(forest.telephones("bavaro"), vec!["2299", "2201", "2202"]);
}

#[test]
fn edit_to_same_key_writes_nothing() {
    let forest = sample_forest();
    let before = forest.read("localities/bavaro.xml");
    let store = open(&forest);
    let outcome = store
        .edit_extension(
            &locality("bavaro"),
            &ExtensionKey::new("Caja 1", "2201"),
            "Caja 1",
            "2201",
        )
        .unwrap();
    assert_eq!(outcome, EditOutcome::Unchanged);
    assert_eq!(forest.read("localities/bavaro.xml"), before);
}

#[test]
fn edit_and_delete_of_absent_extension_are_not_found() {
    let forest = sample_forest();
    let before = forest.read("localities/bavaro.xml");
    let store = open(&forest);

    let err = store
        .edit_extension(
            &locality("bavaro"),
            &ExtensionKey::new("Caja 9", "2209"),
            "Caja 10",
            "2210",
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = store
        .delete_extension(&locality("bavaro"), "Caja 9", "2209")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(forest.read("localities/bavaro.xml"), before);
}

#[test]
fn deleting_last_extension_leaves_empty_locality() {
    let forest = sample_forest();
    let store = open(&forest);
    let removed = store
        .delete_extension(&locality("romana"), "Gerencia", "3200")
        .unwrap();
    assert_eq!(removed.number, "3200");

    let directory = forest.read_directory("localities/romana.xml");
    assert!(directory.children.is_empty());
    assert_eq!(directory.title.as_deref(), Some("La Romana"));
    assert!(store
        .get_locality(&locality("romana"))
        .unwrap()
        .extensions
        .is_empty());
    // Still listed by its branch.
    assert_eq!(
        forest.item_names("branches/zona-este/centro.xml"),
        vec!["Higuey", "La Romana"]
    );
    assert!(store.verify().unwrap().is_clean());
}

#[test]
fn invalid_extension_is_rejected_before_writing() {
    let forest = sample_forest();
    let before = forest.read("localities/bavaro.xml");
    let store = open(&forest);
    for (department, number) in [("Caja 3", "12a"), ("", "2203"), ("   ", "2203")] {
        let err = store
            .add_extension(&locality("bavaro"), department, number, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{department:?} {number:?}");
    }
    assert_eq!(forest.read("localities/bavaro.xml"), before);
}

#[test]
fn locality_ids_are_global() {
    let forest = sample_forest();
    let store = open(&forest);
    let err = store
        .add_locality(&zone("zona-norte"), None, "Bavaro")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(forest.item_names("zones/zona-norte.xml"), vec!["Santiago"]);
}

#[test]
fn move_conserves_extensions() {
    let forest = sample_forest();
    let store = open(&forest);
    let before = keys_of(&store, "bavaro").len() + keys_of(&store, "higuey").len();

    let moving = [
        ExtensionKey::new("Caja 1", "2201"),
        ExtensionKey::new("Caja 2", "2202"),
        ExtensionKey::new("Nadie", "9999"),
    ];
    let report = store
        .move_extensions(
            &moving,
            &locality("bavaro"),
            &zone("zona-este"),
            MoveDestination::Existing(locality("higuey")),
        )
        .unwrap();
    assert_eq!(report.moved(), 2);

    let bavaro = keys_of(&store, "bavaro");
    let higuey = keys_of(&store, "higuey");
    assert_eq!(bavaro.len() + higuey.len(), before);
    for key in &moving[..2] {
        assert!(higuey.contains(key));
        assert!(!bavaro.contains(key));
    }
    assert_eq!(store.stats().unwrap().extensions, SAMPLE_EXTENSION_COUNT);
}

#[test]
fn move_into_new_locality_under_branch() {
    let forest = sample_forest();
    let store = open(&forest);
    let report = store
        .move_extensions(
            &[ExtensionKey::new("Recepcion", "4100")],
            &locality("santiago"),
            &zone("zona-este"),
            MoveDestination::New {
                name: "Punta Cana".to_string(),
                branch: Some(BranchId::parse("centro").unwrap()),
            },
        )
        .unwrap();
    assert!(report.created_destination);
    assert_eq!(
        forest.item_names("branches/zona-este/centro.xml"),
        vec!["Higuey", "La Romana", "Punta Cana"]
    );
    assert_eq!(forest.telephones("punta-cana"), vec!["4100"]);
    assert_eq!(forest.telephones("santiago"), vec!["4101"]);
}

#[test]
fn zone_delete_removes_whole_subtree() {
    let forest = sample_forest();
    let store = open(&forest);
    let report = store.delete_zone(&zone("zona-este")).unwrap();
    assert!(report.is_complete());

    assert_eq!(
        forest.record_files(),
        vec![
            "MainMenu.xml",
            "localities/santiago.xml",
            "zones/zona-norte.xml"
        ]
    );
    assert_eq!(forest.item_names("MainMenu.xml"), vec!["Zona Norte"]);
    assert!(store.verify().unwrap().is_clean());
}

#[test]
fn failed_sub_delete_keeps_zone_listed() {
    let forest = sample_forest();
    // A directory where a locality file should be cannot be removed as a file.
    fs::remove_file(forest.path("localities/higuey.xml")).unwrap();
    forest.write_raw("localities/higuey.xml/keep", "x");
    let store = open(&forest);

    let err = store.delete_zone(&zone("zona-este")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialFailure);
    let StoreError::PartialFailure(failure) = err else {
        panic!("expected a partial failure");
    };
    let PartialFailure::Cascade(report) = *failure else {
        panic!("expected a cascade report");
    };
    assert_eq!(report.failed(), 1);

    assert_eq!(forest.item_names("MainMenu.xml"), vec!["Zona Este", "Zona Norte"]);
    assert!(forest.exists("zones/zona-este.xml"));
    assert!(!forest.exists("localities/bavaro.xml"));
    assert!(!forest.exists("localities/romana.xml"));
    // Survivors no longer point at what was deleted.
    assert_eq!(forest.item_names("zones/zona-este.xml"), vec!["Centro"]);
    assert_eq!(
        forest.item_names("branches/zona-este/centro.xml"),
        vec!["Higuey"]
    );
}

#[test]
fn resolution_ignores_case() {
    let forest = TestForest::new();
    forest.main_menu(&[("Zona Este", "zonaeste")]);
    forest.write_raw(
        "zones/ZonaEste.xml",
        &forest.menu_xml("Zona Este", &[FixtureItem::locality("Bavaro", "bavaro")]),
    );
    forest.write_raw(
        "Localities/BAVARO.xml",
        &forest.directory_xml("Bavaro", &[("Caja 1", "2201")]),
    );

    let resolver = PathResolver::new(forest.root()).unwrap();
    let expected = forest.path("zones/ZonaEste.xml");
    for name in ["zonaeste.xml", "ZONAESTE.XML", "ZonaEste.xml"] {
        assert_eq!(resolver.resolve(&["zones", name]).unwrap(), expected);
    }
    assert!(matches!(
        resolver.resolve(&["zones", "nope.xml"]),
        Err(ResolveError::NotFound { .. })
    ));

    let store = open(&forest);
    let listed = store.get_zone(&zone("zonaeste")).unwrap();
    assert_eq!(listed.items.len(), 1);
    store
        .add_extension(&locality("bavaro"), "Caja 2", "2202", None)
        .unwrap();
    // The existing file was rewritten; no lower-case twin appeared.
    assert_eq!(
        forest.record_files(),
        vec!["Localities/BAVARO.xml", "MainMenu.xml", "zones/ZonaEste.xml"]
    );
}

#[test]
fn concurrent_writers_lose_nothing() {
    let forest = sample_forest();
    let store = open(&forest);

    std::thread::scope(|scope| {
        for i in 0..8 {
            let store = &store;
            scope.spawn(move || {
                store
                    .add_extension(
                        &locality("bavaro"),
                        &format!("Caja {}", i + 10),
                        &format!("23{i:02}"),
                        None,
                    )
                    .unwrap();
            });
        }
        for name in ["Macao", "Uvero Alto", "Miches"] {
            let store = &store;
            scope.spawn(move || {
                store.add_locality(&zone("zona-este"), None, name).unwrap();
            });
        }
    });

    assert_eq!(keys_of(&store, "bavaro").len(), 11);
    let mut items = forest.item_names("zones/zona-este.xml");
    items.sort();
    assert_eq!(items, vec!["Bavaro", "Centro", "Macao", "Miches", "Uvero Alto"]);
    assert!(store.verify().unwrap().is_clean());
    forest.assert_no_temp_files();
}
